use serde_json::json;
use std::sync::Arc;

use crate::cli::OutputFormat;
use crate::resolver::{EntityResolver, PgEntityStore};

pub async fn handle(address: &str, output_format: OutputFormat) -> anyhow::Result<()> {
    let (directory, pool) = super::open_directory().await?;
    let resolver = EntityResolver::new(directory, Arc::new(PgEntityStore::new(pool)));

    match resolver.find_by_contact_address(address).await? {
        Some(hit) => match output_format {
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({
                        "found": true,
                        "tenant": hit.tenant,
                        "entity_type": hit.entity_type,
                        "entity": hit.entity,
                    }))?
                );
            }
            OutputFormat::Text => {
                println!("Tenant:      {} ({})", hit.tenant.schema, hit.tenant.display_name);
                println!("Entity type: {}", hit.entity_type);
                println!("Entity:      {} ({})", hit.entity.name, hit.entity.id);
            }
        },
        None => match output_format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&json!({ "found": false }))?);
            }
            OutputFormat::Text => {
                println!("No entity found for {:?} in any tenant", address);
            }
        },
    }

    Ok(())
}
