//! Task dashboard: counts by status and priority, open urgent work.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use anyhow::Result;
use chrono::Utc;

use super::task_link;
use crate::adapters::DashboardRefresher;
use crate::config::paths;
use crate::domain::{Artifact, ArtifactKind, Task, TaskPriority, TaskStatus};

#[derive(Debug, Default, Clone)]
pub struct TaskDashboard;

impl TaskDashboard {
    pub fn render(tasks: &[Task]) -> String {
        let mut by_status: BTreeMap<TaskStatus, usize> = BTreeMap::new();
        let mut by_priority: BTreeMap<TaskPriority, usize> = BTreeMap::new();
        for task in tasks {
            *by_status.entry(task.status).or_default() += 1;
            *by_priority.entry(task.priority).or_default() += 1;
        }

        let mut out = String::new();
        let _ = writeln!(out, "---");
        let _ = writeln!(out, "type: dashboard");
        let _ = writeln!(out, "updated: {}", Utc::now().to_rfc3339());
        let _ = writeln!(out, "---\n");
        let _ = writeln!(out, "# Task Dashboard\n");
        let _ = writeln!(out, "Total tasks: {}\n", tasks.len());

        out.push_str("## By Status\n\n| Status | Count |\n|---|---|\n");
        for status in TaskStatus::ALL {
            let _ = writeln!(out, "| {} | {} |", status, by_status.get(&status).unwrap_or(&0));
        }

        out.push_str("\n## By Priority\n\n| Priority | Count |\n|---|---|\n");
        for priority in TaskPriority::ALL {
            let _ = writeln!(
                out,
                "| {} | {} |",
                priority,
                by_priority.get(&priority).unwrap_or(&0)
            );
        }

        let mut urgent: Vec<&Task> = tasks
            .iter()
            .filter(|t| !t.status.is_terminal())
            .filter(|t| matches!(t.priority, TaskPriority::Critical | TaskPriority::High))
            .collect();
        urgent.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.created_at.cmp(&b.created_at)));

        out.push_str("\n## Open Critical & High\n\n");
        if urgent.is_empty() {
            out.push_str("_Nothing urgent._\n");
        }
        for task in urgent {
            let _ = writeln!(
                out,
                "- {} ({}, {})",
                task_link(task),
                task.priority,
                task.status
            );
        }

        out
    }
}

impl DashboardRefresher for TaskDashboard {
    fn refresh(&self, tasks: &[Task]) -> Result<Vec<Artifact>> {
        Ok(vec![Artifact::new(
            paths::TASK_DASHBOARD,
            ArtifactKind::Dashboard,
            Self::render(tasks),
        )])
    }
}
