use fieldsync_core::db::RecordFilter;
use fieldsync_core::models::Customer;
use fieldsync_core::services::Entity;
use fieldsync_core::util::normalize_text_option;

use crate::cli::CustomerCommands;
use crate::commands::common::{
    format_relative_time, now_ms, open_engine, print_json, resolve_entity_id, truncate, Context,
};
use crate::error::CliError;

pub async fn run_customer(command: CustomerCommands, context: &Context) -> Result<(), CliError> {
    let engine = open_engine(context).await?;
    let customers = engine.customers();

    match command {
        CustomerCommands::Add {
            name,
            email,
            phone,
            address,
        } => {
            let mut customer = Customer::new(name.trim());
            customer.email = normalize_text_option(email);
            customer.phone = normalize_text_option(phone);
            customer.address = normalize_text_option(address);
            let created = customers.create(customer).await?;
            println!("Created customer {}", created.id);
        }
        CustomerCommands::List { status, json } => {
            let mut filter = RecordFilter::default();
            if let Some(status) = normalize_text_option(status) {
                filter = filter.with_status(status);
            }
            let listed = customers.list(&filter).await?;
            if json {
                print_json(&listed)?;
            } else if listed.is_empty() {
                println!("No customers.");
            } else {
                for line in format_customer_lines(&listed, now_ms()) {
                    println!("{line}");
                }
            }
        }
        CustomerCommands::Show { id, json } => {
            let id = resolve_entity_id(&engine, &id).await?;
            let customer = customers
                .get(&id)
                .await?
                .ok_or_else(|| CliError::NotFound(format!("customer {id}")))?;
            if json {
                print_json(&customer)?;
            } else {
                print_customer(&customer);
            }
        }
        CustomerCommands::Delete { id } => {
            let id = resolve_entity_id(&engine, &id).await?;
            customers.delete(&id).await?;
            println!("Deleted customer {id}");
        }
    }

    Ok(())
}

pub fn format_customer_lines(customers: &[Entity<Customer>], now_ms: i64) -> Vec<String> {
    customers
        .iter()
        .map(|customer| {
            format!(
                "{:<36}  {:<30}  {:<8}  {}",
                customer.id.to_string(),
                truncate(&customer.fields.name, 30),
                customer.fields.status.as_str(),
                format_relative_time(customer.updated_at, now_ms)
            )
        })
        .collect()
}

fn print_customer(customer: &Entity<Customer>) {
    let fields = &customer.fields;
    println!("{}  {}", customer.id, fields.name);
    println!("  status:  {}", fields.status.as_str());
    for (label, value) in [
        ("email", &fields.email),
        ("phone", &fields.phone),
        ("address", &fields.address),
    ] {
        if let Some(value) = value {
            println!("  {label:<8} {value}");
        }
    }
}
