//! Task CLI subcommands.
//!
//! Provides commands to:
//! - `list`: Show tasks, optionally filtered by status
//! - `show`: Display one task with its audit trail
//! - `move`: Move a task along the workflow
//! - `edit`: Change priority or category

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Subcommand;

use crate::config;
use crate::domain::{Task, TaskCategory, TaskPriority, TaskStatus};
use crate::storage;
use crate::tasks::{TaskEdit, TaskManager};

/// Task-related subcommands
#[derive(Subcommand, Debug)]
pub enum TaskCommands {
    /// List tasks
    List {
        /// Only tasks in this status (new, ready, in-progress, in-review, done)
        #[arg(short, long)]
        status: Option<TaskStatus>,
    },

    /// Show a task and its audit trail
    Show {
        /// Task ID
        task_id: String,
    },

    /// Move a task to another status
    Move {
        /// Task ID
        task_id: String,

        /// Target status
        status: TaskStatus,

        /// Reason recorded in the audit trail
        #[arg(short, long, default_value = "moved from CLI")]
        reason: String,
    },

    /// Change priority and/or category
    Edit {
        /// Task ID
        task_id: String,

        /// critical, high, medium or low
        #[arg(short, long)]
        priority: Option<TaskPriority>,

        /// technical, business, process, documentation or research
        #[arg(short, long)]
        category: Option<TaskCategory>,
    },
}

/// Manager over the configured task area, mirroring to a remote vault
async fn manager() -> Result<TaskManager> {
    let settings = config::settings()?;
    let manager = TaskManager::new(settings.task_root());
    if !settings.vault.is_remote() {
        return Ok(manager);
    }
    let backend = storage::from_settings(settings)
        .await
        .context("Failed to set up storage backend for the remote vault")?;
    Ok(manager.with_mirror(Arc::clone(&backend)))
}

pub async fn execute(command: TaskCommands) -> Result<()> {
    let manager = manager().await?;
    match command {
        TaskCommands::List { status } => list(&manager, status).await,
        TaskCommands::Show { task_id } => {
            let task = manager.get(&task_id).await?;
            print_task(&task);
            Ok(())
        }
        TaskCommands::Move {
            task_id,
            status,
            reason,
        } => {
            let task = manager.transition(&task_id, status, &reason).await?;
            println!("✓ {} is now {}", task.id, task.status);
            Ok(())
        }
        TaskCommands::Edit {
            task_id,
            priority,
            category,
        } => {
            let task = manager
                .edit(&task_id, TaskEdit { priority, category })
                .await?;
            println!(
                "✓ {} updated (priority {}, category {})",
                task.id, task.priority, task.category
            );
            Ok(())
        }
    }
}

async fn list(manager: &TaskManager, status: Option<TaskStatus>) -> Result<()> {
    let tasks = manager.list(status).await?;
    if tasks.is_empty() {
        println!("No tasks found");
        return Ok(());
    }

    println!(
        "{:<13} {:<12} {:<9} {:<14} {:<40}",
        "ID", "STATUS", "PRIORITY", "CATEGORY", "TITLE"
    );
    println!("{}", "-".repeat(90));
    for task in &tasks {
        let title = if task.title.chars().count() > 40 {
            format!("{}...", task.title.chars().take(37).collect::<String>())
        } else {
            task.title.clone()
        };
        println!(
            "{:<13} {:<12} {:<9} {:<14} {:<40}",
            task.id,
            task.status.as_str(),
            task.priority.as_str(),
            task.category.as_str(),
            title
        );
    }
    println!("\nTotal: {} tasks", tasks.len());
    Ok(())
}

fn print_task(task: &Task) {
    println!("ID:       {}", task.id);
    println!("Title:    {}", task.title);
    println!("Status:   {}", task.status);
    println!("Priority: {}", task.priority);
    println!("Category: {}", task.category);
    println!("Meeting:  {}", task.source_meeting);
    if let Some(note) = &task.meeting_note {
        println!("Note:     [[{}]]", note);
    }
    if !task.linked_entities.is_empty() {
        let names: Vec<&str> = task.linked_entities.iter().map(|e| e.name.as_str()).collect();
        println!("Related:  {}", names.join(", "));
    }
    if !task.description.is_empty() {
        println!("\n{}", task.description);
    }

    println!("\nAudit trail:");
    for entry in &task.audit {
        println!("  {}  {:<11}  {}", entry.at, entry.status.as_str(), entry.reason);
    }
}
