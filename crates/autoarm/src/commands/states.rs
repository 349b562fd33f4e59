//! `states`: the alarm states and how reconciliation treats each one.

use serde::Serialize;
use strum::IntoEnumIterator;
use tabled::Tabled;

use autoarm_core::AlarmState;

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Serialize, Tabled)]
struct StateRow {
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Steady")]
    steady: bool,
    #[tabled(rename = "Override")]
    r#override: bool,
    #[tabled(rename = "Ephemeral")]
    ephemeral: bool,
    #[tabled(rename = "Zombie")]
    zombie: bool,
}

impl StateRow {
    fn new(state: AlarmState) -> Self {
        Self {
            state: state.to_string(),
            steady: state.is_steady(),
            r#override: state.is_override(),
            ephemeral: state.is_ephemeral(),
            zombie: state.is_zombie(),
        }
    }
}

pub fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let rows: Vec<StateRow> = AlarmState::iter().map(StateRow::new).collect();
    let color = output::should_color(global.color);
    let out = output::render_list(
        global.output,
        &rows,
        |r| StateRow {
            state: output::paint_state(&r.state, color),
            ..r.clone()
        },
        |r| r.state.clone(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vacation_is_a_steady_override() {
        let row = StateRow::new(AlarmState::ArmedVacation);
        assert!(row.steady);
        assert!(row.r#override);
        assert!(!row.zombie);
    }
}
