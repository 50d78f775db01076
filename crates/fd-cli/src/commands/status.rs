//! Status command implementation

use anyhow::Result;

use crate::ipc::ControlClient;
use crate::output::{format_status, print_error, print_success, print_warning};

/// Execute the status command
pub async fn status_command(client: &mut ControlClient) -> Result<()> {
    let status = match client.status().await {
        Ok(s) => s,
        Err(e) => {
            print_error(&format!("Failed to get control-plane status: {}", e));
            print_error("Is the control plane running? Try: fd-control --foreground");
            return Err(e);
        }
    };

    print!("{}", format_status(&status));
    Ok(())
}

/// Ask the daemon to shut down
pub async fn stop_command(client: &mut ControlClient) -> Result<()> {
    match client.shutdown().await {
        Ok(()) => {
            print_success("Control plane stopping");
            Ok(())
        }
        Err(e) if e.to_string().contains("Is fd-control running") => {
            print_warning("Control plane is not running");
            Ok(())
        }
        Err(e) => Err(e),
    }
}
