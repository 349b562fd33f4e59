//! `reset`: one reconciliation against a simulated home.
//!
//! Builds an in-memory host from the flags, starts the engine on it (which
//! reconciles once at startup), forces a reset as an explicit action and
//! reports what happened.

use std::fmt::Write;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;

use autoarm_core::armer::LAST_CALCULATION_ENTITY;
use autoarm_core::{
    AlarmState, ArmerConfig, CalendarEvent, Clock, HostPorts, MemoryHost, Supervisor,
    TokioClock, TokioScheduler,
};

use crate::cli::{GlobalOpts, ResetArgs};
use crate::commands::load_config;
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
struct ResetReport {
    alarm_panel: String,
    before: String,
    after: String,
    result: String,
    calculation: Value,
    notifications: Vec<String>,
    failures: u64,
}

fn parse_event(raw: &str) -> Result<(String, String), CliError> {
    match raw.split_once('=') {
        Some((calendar, summary)) if !calendar.is_empty() && !summary.is_empty() => {
            Ok((calendar.to_owned(), summary.to_owned()))
        }
        _ => Err(CliError::Usage {
            flag: "event".into(),
            reason: format!("expected CALENDAR=SUMMARY, got {raw:?}"),
        }),
    }
}

fn seed_host(
    host: &MemoryHost,
    config: &ArmerConfig,
    args: &ResetArgs,
    now: DateTime<Utc>,
) -> Result<(), CliError> {
    let before = AlarmState::parse(&args.panel).ok_or_else(|| CliError::Usage {
        flag: "panel".into(),
        reason: format!("unknown alarm state {:?}", args.panel),
    })?;
    host.set_state(&config.alarm_panel, before.as_ref());
    host.set_sun(args.night);
    for occupant in &config.occupancy.entity_ids {
        let state = if args.home.contains(occupant) {
            "home"
        } else {
            "not_home"
        };
        host.set_state(occupant, state);
    }
    for raw in &args.events {
        let (calendar, summary) = parse_event(raw)?;
        host.add_calendar_event(
            &calendar,
            CalendarEvent::new(summary, now - Duration::hours(1), now + Duration::hours(1)),
        );
    }
    Ok(())
}

fn report_detail(report: &ResetReport, color: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{}: {} -> {}",
        report.alarm_panel,
        output::paint_state(&report.before, color),
        output::paint_state(&report.after, color)
    );
    let _ = writeln!(out, "reset result: {}", report.result);
    let flag = |key: &str| {
        report
            .calculation
            .get(key)
            .map_or_else(|| "-".to_owned(), ToString::to_string)
    };
    let _ = writeln!(
        out,
        "occupied: {}  night: {}  calendar hold: {}  intervention hold: {}",
        flag("occupied"),
        flag("night"),
        flag("calendar_hold"),
        flag("intervention_hold")
    );
    if report.failures > 0 {
        let _ = writeln!(out, "failures: {}", report.failures);
    }
    for message in &report.notifications {
        let _ = writeln!(out, "notify: {message}");
    }
    out.trim_end().to_owned()
}

pub async fn handle(args: &ResetArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let (_, config) = load_config(global)?;

    let clock: Arc<dyn Clock> = Arc::new(TokioClock::new());
    let host = MemoryHost::with_clock(Arc::clone(&clock));
    let scheduler = Arc::new(TokioScheduler::with_clock(Arc::clone(&clock)));
    seed_host(&host, &config, args, clock.now())?;
    host.settle().await;

    let panel = config.alarm_panel.clone();
    let supervisor = Supervisor::with_config(HostPorts::in_memory(&host, &scheduler), config);
    supervisor.start().await?;
    host.settle().await;
    let result = supervisor.reset_state().await?;
    host.settle().await;

    let failures = supervisor
        .armer()
        .await
        .map_or(0, |armer| armer.health().failures);
    let report = ResetReport {
        before: args.panel.clone(),
        after: host.state_of(&panel).unwrap_or_default(),
        alarm_panel: panel,
        result,
        calculation: host
            .entity(LAST_CALCULATION_ENTITY)
            .map_or(Value::Null, |e| Value::Object(e.attributes)),
        notifications: host
            .notifications()
            .await
            .into_iter()
            .map(|n| n.payload.message)
            .collect(),
        failures,
    };
    supervisor.shutdown().await;
    scheduler.shutdown();

    let color = output::should_color(global.color);
    let out = output::render_single(
        global.output,
        &report,
        |r| report_detail(r, color),
        |r| r.after.clone(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn event_flag_needs_both_halves() {
        assert_eq!(
            parse_event("calendar.house=Vacation in Rome").unwrap(),
            ("calendar.house".to_owned(), "Vacation in Rome".to_owned())
        );
        assert!(parse_event("calendar.house").is_err());
        assert!(parse_event("=Away").is_err());
    }
}
