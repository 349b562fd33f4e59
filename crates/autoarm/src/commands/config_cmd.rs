//! Config subcommand handlers.

use std::fmt::Write;

use serde::Serialize;

use autoarm_core::ArmerConfig;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::commands::{config_path, load_config};
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
struct Validation {
    valid: bool,
    path: String,
    alarm_panel: String,
    occupants: usize,
    calendars: usize,
    buttons: Vec<String>,
    warnings: Vec<String>,
}

impl Validation {
    fn new(path: String, config: &ArmerConfig) -> Self {
        Self {
            valid: true,
            path,
            alarm_panel: config.alarm_panel.clone(),
            occupants: config.occupancy.entity_ids.len(),
            calendars: config.calendar_control.calendars.len(),
            buttons: config.buttons.keys().map(ToString::to_string).collect(),
            warnings: autoarm_config::transition_warnings(config),
        }
    }
}

fn validation_detail(v: &Validation) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Configuration valid: {}", v.path);
    let _ = writeln!(out, "  alarm panel: {}", v.alarm_panel);
    let _ = writeln!(out, "  occupants:   {}", v.occupants);
    let _ = writeln!(out, "  calendars:   {}", v.calendars);
    if !v.buttons.is_empty() {
        let _ = writeln!(out, "  buttons:     {}", v.buttons.join(", "));
    }
    for warning in &v.warnings {
        let _ = writeln!(out, "  warning: {warning}");
    }
    out.trim_end().to_owned()
}

fn config_detail(config: &ArmerConfig) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "alarm_panel      = {}", config.alarm_panel);
    if let Some(cutoff) = config.sunrise_cutoff {
        let _ = writeln!(out, "sunrise_cutoff   = {cutoff}");
    }
    let _ = writeln!(out, "arm_away_delay   = {}s", config.arm_away_delay);
    let _ = writeln!(out, "intervention_ttl = {}m", config.intervention_ttl);
    let _ = writeln!(
        out,
        "throttle         = {} calls / {}s",
        config.throttle_calls, config.throttle_seconds
    );
    let _ = writeln!(
        out,
        "occupants        = {}",
        config.occupancy.entity_ids.join(", ")
    );
    let _ = writeln!(
        out,
        "no_event_mode    = {}",
        config.calendar_control.no_event_mode
    );
    for calendar in &config.calendar_control.calendars {
        let _ = writeln!(
            out,
            "calendar         = {} (every {}m)",
            calendar.entity_id, calendar.poll_interval
        );
    }
    let rules: Vec<String> = config.transitions.keys().map(ToString::to_string).collect();
    let _ = writeln!(out, "transitions      = {}", rules.join(" > "));
    out.trim_end().to_owned()
}

pub fn handle(args: &ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            output::print_output(&config_path(global).display().to_string(), global.quiet);
            Ok(())
        }
        ConfigCommand::Validate => {
            let (path, config) = load_config(global)?;
            let report = Validation::new(path.display().to_string(), &config);
            let out = output::render_single(global.output, &report, validation_detail, |v| {
                v.alarm_panel.clone()
            })?;
            output::print_output(&out, global.quiet);
            Ok(())
        }
        ConfigCommand::Show => {
            let (_, config) = load_config(global)?;
            let out = output::render_single(global.output, &config, config_detail, |c| {
                c.alarm_panel.clone()
            })?;
            output::print_output(&out, global.quiet);
            Ok(())
        }
    }
}
