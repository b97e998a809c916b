use std::path::Path;

use serde::Serialize;
use tern_db::ident::format_identifier;
use tern_db::{BatchReport, Direction, LockHolder, MigrationEvent, Plan, StatusReport};

const MIN_WIDTH: usize = 60;
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// `status --json` payload.
#[derive(Serialize)]
pub struct StatusView<'a> {
    pub database: &'a Path,
    pub lock: Option<&'a LockHolder>,
    #[serde(flatten)]
    pub report: &'a StatusReport,
}

/// Boxed status table: summary on top, one row per migration below.
pub fn render_status(report: &StatusReport, lock: Option<&LockHolder>, database: &Path) -> String {
    let applied = report.applied().count();
    let pending = report.pending().count();

    let lock_line = match lock {
        Some(held) => format!(
            "held by {} since {}",
            held.holder,
            held.acquired_at.format(TIME_FORMAT)
        ),
        None => "free".to_string(),
    };

    let mut summary = vec![
        format!("Database    {}", display_path(database)),
        format!("Lock        {lock_line}"),
        format!("Migrations  {applied} applied, {pending} pending"),
    ];
    if !report.orphaned.is_empty() {
        summary.push(format!(
            "Orphaned    {} ledger row(s) not in this build",
            report.orphaned.len()
        ));
    }

    let mut rows: Vec<String> = report
        .migrations
        .iter()
        .map(|m| {
            let id = format_identifier(m.version, &m.name);
            match m.applied_at {
                Some(at) => format!("✓ {id:<34} {}", at.format(TIME_FORMAT)),
                None => format!("· {id:<34} pending"),
            }
        })
        .collect();
    rows.extend(report.orphaned.iter().map(|e| {
        format!(
            "! {:<34} {} (orphaned)",
            format_identifier(e.version, &e.name),
            e.applied_at.format(TIME_FORMAT)
        )
    }));
    if rows.is_empty() {
        rows.push("no migrations registered".to_string());
    }

    let version = env!("CARGO_PKG_VERSION");
    boxed(&format!("Tern v{version}"), &summary, &rows)
}

fn boxed(title: &str, summary: &[String], rows: &[String]) -> String {
    let longest = summary
        .iter()
        .chain(rows)
        .map(|r| r.chars().count())
        .max()
        .unwrap_or(0);
    let width = MIN_WIDTH.max(longest + 4);
    let inner = width - 4; // "│ " + " │"

    let title_dashes = width.saturating_sub(title.chars().count() + 7); // "╭─── " + " " + "╮"
    let top = format!("╭─── {title} {}╮", "─".repeat(title_dashes));
    let rule = format!("├{}┤", "─".repeat(width - 2));
    let bottom = format!("╰{}╯", "─".repeat(width - 2));
    let row = |text: &str| format!("│ {text:<inner$} │");

    let mut out = vec![top, row("")];
    out.extend(summary.iter().map(|s| row(s)));
    out.push(row(""));
    out.push(rule);
    out.extend(rows.iter().map(|r| row(r)));
    out.push(bottom);
    out.join("\n")
}

pub fn render_plan(plan: &Plan) -> String {
    if plan.is_empty() {
        return match plan.direction {
            Direction::Up => "Dry run: nothing to apply, database is up to date.".to_string(),
            Direction::Down => "Dry run: nothing to revert.".to_string(),
        };
    }

    let verb = match plan.direction {
        Direction::Up => "applied",
        Direction::Down => "reverted",
    };
    let mut out = vec![format!(
        "Dry run: {} migration(s) would be {verb} ({} statement(s))",
        plan.migrations.len(),
        plan.statement_count()
    )];
    for m in &plan.migrations {
        out.push(String::new());
        let id = format_identifier(m.version, &m.name);
        if m.description.is_empty() {
            out.push(id);
        } else {
            out.push(format!("{id}: {}", m.description));
        }
        if m.statements.is_empty() {
            out.push("  (no changes needed)".to_string());
        }
        for sql in &m.statements {
            out.push(format!("  {};", flatten_sql(sql)));
        }
    }
    out.join("\n")
}

pub fn render_report(report: &BatchReport) -> String {
    match (report.direction, report.is_empty()) {
        (Direction::Up, true) => "Database is up to date.".to_string(),
        (Direction::Down, true) => "Nothing to revert.".to_string(),
        (Direction::Up, false) => format!(
            "Applied {} migration(s), {} statement(s).",
            report.completed.len(),
            report.statements_executed()
        ),
        (Direction::Down, false) => format!(
            "Reverted {} migration(s), {} statement(s).",
            report.completed.len(),
            report.statements_executed()
        ),
    }
}

/// One progress line per finished migration; `Started` prints nothing.
pub fn render_event(event: &MigrationEvent) -> Option<String> {
    match event {
        MigrationEvent::Started { .. } => None,
        MigrationEvent::Completed {
            direction,
            migration,
            statements,
            elapsed_ms,
        } => {
            let verb = match direction {
                Direction::Up => "applied",
                Direction::Down => "reverted",
            };
            Some(format!(
                "  ✓ {verb} {migration} ({statements} statement(s), {elapsed_ms} ms)"
            ))
        }
        MigrationEvent::Failed {
            migration, error, ..
        } => Some(format!("  ✗ {migration}: {error}")),
    }
}

/// Collapse multi-line DDL onto one line for plan output.
fn flatten_sql(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn display_path(path: &Path) -> String {
    let shown = path.to_string_lossy();
    match std::env::var("HOME") {
        Ok(home) if !home.is_empty() => shown.replace(&home, "~"),
        _ => shown.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tern_db::{CompletedMigration, LedgerEntry, MigrationStatus, PlannedMigration};

    fn status() -> StatusReport {
        StatusReport {
            migrations: vec![
                MigrationStatus {
                    version: 1,
                    name: "create_memories".into(),
                    description: String::new(),
                    applied_at: Some(Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap()),
                },
                MigrationStatus {
                    version: 2,
                    name: "create_entities".into(),
                    description: String::new(),
                    applied_at: None,
                },
            ],
            orphaned: vec![LedgerEntry {
                version: 9,
                name: "dropped_feature".into(),
                applied_at: Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap(),
            }],
        }
    }

    #[test]
    fn status_box_lines_share_one_width() {
        let text = render_status(&status(), None, Path::new("/srv/memory.db"));
        let widths: Vec<usize> = text.lines().map(|l| l.chars().count()).collect();
        assert!(widths.iter().all(|w| *w == widths[0]), "{text}");
        assert!(text.starts_with("╭─── Tern v"));
        assert!(text.contains("Lock        free"));
        assert!(text.contains("1 applied, 1 pending"));
        assert!(text.contains("✓ 001_create_memories"));
        assert!(text.contains("2026-03-01 09:30:00 UTC"));
        assert!(text.contains("· 002_create_entities"));
        assert!(text.contains("! 009_dropped_feature"));
    }

    #[test]
    fn status_box_names_lock_holder() {
        let holder = LockHolder {
            holder: "pid-42-abc".into(),
            acquired_at: Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap(),
        };
        let text = render_status(&status(), Some(&holder), Path::new("tern.db"));
        assert!(text.contains("held by pid-42-abc since 2026-03-01 10:00:00 UTC"));
    }

    #[test]
    fn status_json_flattens_report() {
        let report = status();
        let view = StatusView {
            database: Path::new("tern.db"),
            lock: None,
            report: &report,
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["database"], "tern.db");
        assert!(json["lock"].is_null());
        assert_eq!(json["migrations"][1]["name"], "create_entities");
        assert_eq!(json["orphaned"][0]["version"], 9);
    }

    #[test]
    fn plan_lists_statements_per_migration() {
        let plan = Plan {
            direction: Direction::Up,
            migrations: vec![PlannedMigration {
                version: 3,
                name: "add_memory_tags".into(),
                description: "JSON tag list on memories".into(),
                statements: vec![
                    "ALTER TABLE \"memories\"\n    ADD COLUMN \"tags\" TEXT".into(),
                ],
            }],
        };
        let text = render_plan(&plan);
        assert!(text.starts_with("Dry run: 1 migration(s) would be applied (1 statement(s))"));
        assert!(text.contains("003_add_memory_tags: JSON tag list on memories"));
        assert!(text.contains("  ALTER TABLE \"memories\" ADD COLUMN \"tags\" TEXT;"));
    }

    #[test]
    fn empty_plan_and_report_read_as_up_to_date() {
        let plan = Plan {
            direction: Direction::Up,
            migrations: vec![],
        };
        assert!(render_plan(&plan).contains("up to date"));

        let report = BatchReport {
            direction: Direction::Down,
            completed: vec![],
        };
        assert_eq!(render_report(&report), "Nothing to revert.");
    }

    #[test]
    fn report_counts_migrations_and_statements() {
        let report = BatchReport {
            direction: Direction::Up,
            completed: vec![
                CompletedMigration {
                    version: 1,
                    name: "a".into(),
                    statements: 2,
                    elapsed_ms: 1,
                },
                CompletedMigration {
                    version: 2,
                    name: "b".into(),
                    statements: 3,
                    elapsed_ms: 1,
                },
            ],
        };
        assert_eq!(
            render_report(&report),
            "Applied 2 migration(s), 5 statement(s)."
        );
    }

    #[test]
    fn started_events_are_silent() {
        let started = MigrationEvent::Started {
            direction: Direction::Up,
            migration: "001_a".into(),
        };
        assert!(render_event(&started).is_none());

        let failed = MigrationEvent::Failed {
            direction: Direction::Up,
            migration: "001_a".into(),
            error: "boom".into(),
        };
        assert_eq!(render_event(&failed).unwrap(), "  ✗ 001_a: boom");
    }
}
