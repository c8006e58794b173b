use clap::Args;
use flexnode::status::StatusCollector;
use flexnode::Platform;
use std::sync::Arc;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit the full report as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: StatusArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let config = Arc::new(global.load_config()?);
    let platform = Arc::new(Platform::host());
    let status = StatusCollector::new(config, platform).collect().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("machine:     {}", status.machine_name);
    println!("os:          {}", status.os);
    println!(
        "arc:         agent {}, {}",
        if status.arc.agent_installed {
            "installed"
        } else {
            "missing"
        },
        if status.arc.connected {
            "connected"
        } else {
            "not connected"
        }
    );
    for (name, component) in [("containerd", &status.containerd), ("kubelet", &status.kubelet)] {
        match (component.installed, &component.version) {
            (true, Some(version)) => println!("{:<12} {}", format!("{}:", name), version),
            (true, None) => println!("{:<12} installed", format!("{}:", name)),
            (false, _) => println!("{:<12} not installed", format!("{}:", name)),
        }
    }
    for (name, service) in &status.services {
        println!(
            "service {:<11} {}",
            format!("{}:", name),
            if service.active {
                "active"
            } else if service.exists {
                "inactive"
            } else {
                "not registered"
            }
        );
    }
    println!(
        "kubeconfig:  {}",
        if status.kubeconfig_present {
            "present"
        } else {
            "missing"
        }
    );
    println!("ready:       {}", status.ready());
    Ok(())
}
