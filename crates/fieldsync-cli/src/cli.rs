use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "fieldsync")]
#[command(about = "Offline-first records for field operations")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to the engine config file (JSON)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Work offline: queue writes without contacting the remote service
    #[arg(long, global = true)]
    pub offline: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage customers
    Customer {
        #[command(subcommand)]
        command: CustomerCommands,
    },
    /// Manage jobs
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// Manage workers and their timesheets
    Worker {
        #[command(subcommand)]
        command: WorkerCommands,
    },
    /// Push queued changes and refresh from the remote service
    Sync {
        #[command(subcommand)]
        command: Option<SyncCommands>,
    },
    /// Show sync state and queue size
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect or clear the outbox
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Remove expired cached records
    Purge,
    /// Run background sync until interrupted
    Watch,
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Subcommand)]
pub enum CustomerCommands {
    /// Create a customer
    #[command(alias = "new")]
    Add {
        name: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        address: Option<String>,
    },
    /// List customers
    List {
        /// Filter by status (active, inactive)
        #[arg(long)]
        status: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one customer
    Show {
        /// Customer ID (permanent or temp_...)
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a customer
    Delete {
        /// Customer ID (permanent or temp_...)
        id: String,
    },
}

#[derive(Subcommand)]
pub enum JobCommands {
    /// Create a job for a customer
    #[command(alias = "new")]
    Add {
        title: String,
        /// Owning customer ID
        #[arg(long)]
        customer: String,
        /// Scheduled date (YYYY-MM-DD)
        #[arg(long, value_name = "DATE")]
        date: Option<NaiveDate>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// List jobs
    List {
        /// Only jobs for this customer
        #[arg(long)]
        customer: Option<String>,
        /// Filter by status (scheduled, in_progress, completed, cancelled)
        #[arg(long)]
        status: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change a job's status
    Status {
        /// Job ID
        id: String,
        /// New status
        status: String,
    },
}

#[derive(Subcommand)]
pub enum WorkerCommands {
    /// Create a worker
    #[command(alias = "new")]
    Add {
        name: String,
        #[arg(long)]
        role: Option<String>,
        /// Hourly rate in cents
        #[arg(long, default_value = "0")]
        rate_cents: i64,
    },
    /// List workers
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Record hours for one timesheet day
    Hours {
        /// Worker ID
        id: String,
        /// Timesheet day key (e.g. mon, 2024-05-06)
        day: String,
        hours: f64,
        /// Job the hours were spent on
        #[arg(long)]
        job: Option<String>,
        #[arg(long)]
        note: Option<String>,
    },
    /// Show a worker and their timesheet
    Show {
        /// Worker ID
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// List recently logged sync conflicts
    Conflicts {
        /// Number of conflicts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// List queued mutations in send order
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List mutations that were given up on
    Failed {
        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Discard queued mutations
    Clear {
        /// Clear the failed list instead of the queue
        #[arg(long)]
        failed: bool,
    },
}
