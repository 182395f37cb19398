//! Renders a plan as a table for dry runs.

use comfy_table::{Table, presets::UTF8_FULL};
use ethnode_deploy::{ApplyReport, Change, Plan, StepId};

pub fn render(plan: &Plan, preview: &ApplyReport) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Step", "Kind", "Change", "Depends on", "Action"]);

    for (id, _) in preview.changes.iter().filter(|(_, c)| *c == Change::Delete) {
        table.add_row(vec![
            id.to_string(),
            String::new(),
            Change::Delete.to_string(),
            String::new(),
            String::new(),
        ]);
    }

    for step in plan.steps() {
        let change = preview
            .change(&step.id)
            .map(|change| change.to_string())
            .unwrap_or_default();
        let depends_on = step
            .depends_on
            .iter()
            .map(StepId::as_str)
            .collect::<Vec<_>>()
            .join(", ");

        table.add_row(vec![
            step.id.to_string(),
            step.kind.to_string(),
            change,
            depends_on,
            step.action.to_string(),
        ]);
    }

    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethnode_deploy::{Action, RemoteCommand, StepKind};

    #[test]
    fn test_secrets_are_redacted() {
        let mut plan = Plan::new();
        let dir = plan
            .add(
                StepId::new("n/shared/createSharedDir"),
                StepKind::CreateDirectory,
                Action::command(RemoteCommand::new("mkdir -p /data/shared")),
                &[],
            )
            .unwrap();
        plan.add(
            StepId::new("n/shared/writeJwtSecret"),
            StepKind::WriteJwtSecret,
            Action::command(RemoteCommand::new("echo cafebabe > /data/shared/jwt.hex").sensitive()),
            &[dir],
        )
        .unwrap();

        let preview = ApplyReport {
            changes: vec![
                (StepId::new("n/old"), Change::Delete),
                (StepId::new("n/shared/createSharedDir"), Change::Unchanged),
                (StepId::new("n/shared/writeJwtSecret"), Change::Create),
            ],
        };

        let rendered = render(&plan, &preview).to_string();
        assert!(rendered.contains("mkdir -p /data/shared"));
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("cafebabe"));
        assert!(rendered.contains("n/old"));
        assert!(rendered.contains("write-jwt-secret"));
    }
}
