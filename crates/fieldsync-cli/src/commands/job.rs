use fieldsync_core::db::RecordFilter;
use fieldsync_core::models::{Job, JobStatus};
use fieldsync_core::services::Entity;
use fieldsync_core::util::normalize_text_option;

use crate::cli::JobCommands;
use crate::commands::common::{open_engine, print_json, resolve_entity_id, truncate, Context};
use crate::error::CliError;

pub async fn run_job(command: JobCommands, context: &Context) -> Result<(), CliError> {
    let engine = open_engine(context).await?;
    let jobs = engine.jobs();

    match command {
        JobCommands::Add {
            title,
            customer,
            date,
            notes,
        } => {
            let customer_id = resolve_entity_id(&engine, &customer).await?;
            let mut job = Job::new(title.trim(), customer_id);
            job.scheduled_for = date;
            job.notes = normalize_text_option(notes);
            let created = jobs.create(job).await?;
            println!("Created job {}", created.id);
        }
        JobCommands::List {
            customer,
            status,
            json,
        } => {
            let mut filter = RecordFilter::default();
            if let Some(customer) = customer {
                filter = filter.owned_by(resolve_entity_id(&engine, &customer).await?);
            }
            if let Some(status) = status {
                filter = filter.with_status(parse_job_status(&status)?.as_str());
            }
            let listed = jobs.list(&filter).await?;
            if json {
                print_json(&listed)?;
            } else if listed.is_empty() {
                println!("No jobs.");
            } else {
                for line in format_job_lines(&listed) {
                    println!("{line}");
                }
            }
        }
        JobCommands::Status { id, status } => {
            let status = parse_job_status(&status)?;
            let id = resolve_entity_id(&engine, &id).await?;
            let updated = jobs.set_status(&id, status).await?;
            println!("Job {} is now {}", updated.id, updated.fields.status.as_str());
        }
    }

    Ok(())
}

pub fn parse_job_status(value: &str) -> Result<JobStatus, CliError> {
    value.parse::<JobStatus>().map_err(CliError::InvalidArgument)
}

pub fn format_job_lines(jobs: &[Entity<Job>]) -> Vec<String> {
    jobs.iter()
        .map(|job| {
            let scheduled = job
                .fields
                .scheduled_for
                .map_or_else(|| "-".to_string(), |date| date.to_string());
            format!(
                "{:<36}  {:<30}  {:<11}  {:<10}  customer={}",
                job.id.to_string(),
                truncate(&job.fields.title, 30),
                job.fields.status.as_str(),
                scheduled,
                job.fields.customer_id
            )
        })
        .collect()
}
