use fieldsync_core::db::RecordFilter;
use fieldsync_core::models::{TimesheetEntry, Worker};
use fieldsync_core::services::Entity;
use fieldsync_core::util::{normalize_text_option, timesheet_day_key};

use crate::cli::WorkerCommands;
use crate::commands::common::{open_engine, print_json, resolve_entity_id, truncate, Context};
use crate::error::CliError;

pub async fn run_worker(command: WorkerCommands, context: &Context) -> Result<(), CliError> {
    let engine = open_engine(context).await?;
    let workers = engine.workers();

    match command {
        WorkerCommands::Add {
            name,
            role,
            rate_cents,
        } => {
            let mut worker = Worker::new(name.trim());
            worker.role = normalize_text_option(role);
            worker.hourly_rate_cents = rate_cents;
            let created = workers.create(worker).await?;
            println!("Created worker {}", created.id);
        }
        WorkerCommands::List { json } => {
            let listed = workers.list(&RecordFilter::default()).await?;
            if json {
                print_json(&listed)?;
            } else if listed.is_empty() {
                println!("No workers.");
            } else {
                for line in format_worker_lines(&listed) {
                    println!("{line}");
                }
            }
        }
        WorkerCommands::Hours {
            id,
            day,
            hours,
            job,
            note,
        } => {
            let id = resolve_entity_id(&engine, &id).await?;
            let job_id = match job {
                Some(job) => Some(resolve_entity_id(&engine, &job).await?),
                None => None,
            };
            let entry = TimesheetEntry {
                hours,
                job_id,
                note: normalize_text_option(note),
            };
            let updated = workers.record_hours(&id, &day, entry).await?;
            println!(
                "Recorded {hours}h on {} for {} ({}h total)",
                timesheet_day_key(&day),
                updated.id,
                updated.fields.total_hours()
            );
        }
        WorkerCommands::Show { id, json } => {
            let id = resolve_entity_id(&engine, &id).await?;
            let worker = workers
                .get(&id)
                .await?
                .ok_or_else(|| CliError::NotFound(format!("worker {id}")))?;
            if json {
                print_json(&worker)?;
            } else {
                for line in format_timesheet(&worker) {
                    println!("{line}");
                }
            }
        }
    }

    Ok(())
}

pub fn format_worker_lines(workers: &[Entity<Worker>]) -> Vec<String> {
    workers
        .iter()
        .map(|worker| {
            format!(
                "{:<36}  {:<30}  {:<8}  {:>6.1}h",
                worker.id.to_string(),
                truncate(&worker.fields.name, 30),
                worker.fields.status.as_str(),
                worker.fields.total_hours()
            )
        })
        .collect()
}

pub fn format_timesheet(worker: &Entity<Worker>) -> Vec<String> {
    let fields = &worker.fields;
    let mut lines = vec![format!("{}  {}", worker.id, fields.name)];
    if let Some(role) = &fields.role {
        lines.push(format!("  role: {role}"));
    }
    if fields.timesheet.is_empty() {
        lines.push("  no hours recorded".to_string());
        return lines;
    }
    for (day, entry) in &fields.timesheet {
        let mut line = format!("  {day:<12} {:>5.1}h", entry.hours);
        if let Some(job_id) = &entry.job_id {
            line.push_str(&format!("  job={job_id}"));
        }
        if let Some(note) = &entry.note {
            line.push_str(&format!("  {note}"));
        }
        lines.push(line);
    }
    lines.push(format!("  {:<12} {:>5.1}h", "total", fields.total_hours()));
    lines
}
