//! Operation journal listing

use anyhow::Result;

use crate::ipc::ControlClient;
use crate::output::format_operations;

pub async fn ops_command(client: &mut ControlClient, limit: usize) -> Result<()> {
    let operations = client.recent_operations(limit).await?;
    println!("{}", format_operations(&operations));
    Ok(())
}
