//! ethnode provisions Ethereum nodes: an execution client and a consensus client,
//! built from source on a remote host or run on Kubernetes.

mod cli;
mod table;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, DeployType};
use ethnode_deploy::{Change, Deployer, Plan};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    run(cli).await
}

async fn run(cli: Cli) -> Result<()> {
    let mut deployer = Deployer::load_from_file(&cli.config)?;

    let dry_run = cli.deploy_type == Some(DeployType::DryRun);
    if let Some(deployment_type) = cli.deploy_type.and_then(|t| t.deployment_type()) {
        deployer.deployment_type = deployment_type;
    }
    if let Some(replicas) = cli.replicas {
        deployer.replicas = replicas;
    }

    if cli.destroy {
        if dry_run {
            let preview = deployer.preview_destroy(&cli.state)?;
            println!("{}", table::render(&Plan::new(), &preview));
            tracing::info!(
                delete = preview.count(Change::Delete),
                "Dry run, nothing torn down"
            );
            return Ok(());
        }

        let removed = deployer.destroy(&cli.state).await?;
        tracing::info!(steps = removed, "Deployment destroyed");
        return Ok(());
    }

    let jwt = deployer.jwt_secret(&cli.state)?;
    let (plan, nodes) = deployer.plan(&jwt)?;

    if dry_run {
        let preview = deployer.preview(&plan, &cli.state)?;
        println!("{}", table::render(&plan, &preview));
        tracing::info!(
            nodes = nodes.len(),
            create = preview.count(Change::Create),
            update = preview.count(Change::Update),
            delete = preview.count(Change::Delete),
            "Dry run, nothing applied"
        );
        return Ok(());
    }

    let report = deployer.deploy(&plan, &cli.state).await?;

    tracing::info!(
        nodes = nodes.len(),
        created = report.count(Change::Create),
        updated = report.count(Change::Update),
        unchanged = report.count(Change::Unchanged),
        removed = report.count(Change::Delete),
        "Deployment complete"
    );

    Ok(())
}
