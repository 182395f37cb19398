//! Build-from-source template: clone, build and run a client under systemd.

use anyhow::{Context, Result};

use super::{SCRIPTS_DIR, SHARED_GROUP};
use crate::{
    catalog::{
        RecipeContext, RecipeHandle,
        descriptors::{BuildEnv, ClientDescriptor, Toolchain},
    },
    plan::{Action, Plan, RemoteCommand, Step, StepId, StepKind},
    service_unit::ServiceUnit,
};

pub(crate) fn plan(
    desc: &ClientDescriptor,
    ctx: &RecipeContext<'_>,
    plan: &mut Plan,
) -> Result<RecipeHandle> {
    let name = desc.name();
    let connection = ctx.connection.with_context(|| {
        format!(
            "Deploying {} from source requires an SSH connection to the target host",
            name
        )
    })?;

    let scope = &ctx.scope;
    let network = ctx.network;
    let data_dir = ctx.data_dir_for(name);
    let repo_dir = desc.repo_dir(network);
    let home_dir = connection.home_dir();
    let env = BuildEnv {
        network,
        repo_dir: &repo_dir,
        account: desc.service_account.unwrap_or(connection.user.as_str()),
        home_dir: &home_dir,
    };

    let (url, branch) = match ctx.repository {
        Some(repository) => (repository.url.to_string(), repository.branch.clone()),
        None => (desc.repository.to_string(), desc.branch.to_string()),
    };

    tracing::debug!(client = name, %network, %url, %branch, "Planning source deployment");

    let mut steps: Vec<StepId> = Vec::new();

    let create_data_dir = plan.add(
        scope.step("createDataDir"),
        StepKind::CreateDataDir,
        Action::command(RemoteCommand::new(format!("mkdir -p {}", data_dir))),
        &ctx.after,
    )?;
    steps.push(create_data_dir.clone());

    let clone = plan.add(
        scope.step("cloneRepo"),
        StepKind::CloneOrUpdateRepo,
        Action::command(
            RemoteCommand::new(format!("git clone -b {} {} {}", branch, url, repo_dir))
                .on_update(format!(
                    "cd {repo_dir} && git fetch origin {branch} && git checkout {branch} && git pull origin {branch}"
                ))
                .on_delete(format!("rm -rf {}", repo_dir)),
        ),
        &[create_data_dir],
    )?;
    steps.push(clone.clone());

    let mut toolchain = None;
    if let Some(required) = desc.toolchain {
        let (id, added) = toolchain_step(required, ctx, plan)?;
        if added {
            steps.push(id.clone());
        }
        toolchain = Some(id);
    }

    let mut source_ready = clone.clone();
    if let Some(account) = desc.service_account {
        let create_account = plan.add(
            scope.step("createServiceAccount"),
            StepKind::CreateServiceAccount,
            Action::command(RemoteCommand::new(format!(
                "(getent group {group} >/dev/null || groupadd --system {group}) && \
                 (id -u {account} >/dev/null 2>&1 || useradd --system --user-group --groups {group} --shell /usr/sbin/nologin {account})",
                group = SHARED_GROUP,
            ))),
            &ctx.after,
        )?;
        steps.push(create_account.clone());

        source_ready = plan.add(
            scope.step("setOwnership"),
            StepKind::SetOwnership,
            Action::command(RemoteCommand::new(format!(
                "chown -R {account}:{account} {repo_dir}"
            ))),
            &[clone.clone(), create_account],
        )?;
        steps.push(source_ready.clone());
    }

    let mut artifact = source_ready.clone();
    if let Some(build) = desc.build {
        let mut deps = vec![source_ready.clone()];
        deps.extend(toolchain.clone());

        artifact = plan.add(
            scope.step("build"),
            StepKind::Build,
            Action::command(RemoteCommand::new(build(&env))),
            &deps,
        )?;
        steps.push(artifact.clone());
    }

    if let Some(install) = desc.install {
        artifact = plan.add(
            scope.step("installBinary"),
            StepKind::InstallBinary,
            Action::command(RemoteCommand::new(install(&env))),
            &[artifact],
        )?;
        steps.push(artifact.clone());
    }

    let mut unit_deps = vec![artifact];
    let script_path = desc
        .start_script
        .then(|| format!("{}/{}", SCRIPTS_DIR, desc.script_name(network)));
    if let Some(script_path) = &script_path {
        let copy = plan.add(
            scope.step("copyStartScript"),
            StepKind::InstallStartScript,
            Action::copy_asset(
                ctx.assets_dir
                    .join("scripts")
                    .join(desc.script_name(network)),
                script_path.clone(),
            )?,
            &ctx.after,
        )?;
        steps.push(copy.clone());

        let executable = plan.add(
            scope.step("makeStartScriptExecutable"),
            StepKind::MakeExecutable,
            Action::command(RemoteCommand::new(format!("chmod +x {}", script_path))),
            &[copy],
        )?;
        steps.push(executable.clone());
        unit_deps.push(executable);
    }

    let unit = ServiceUnit::new(name, network.clone());
    let unit_steps = unit.plan(&scope.child("service"), ctx.assets_dir, &unit_deps, plan)?;
    let started = unit_steps.last().cloned();
    steps.extend(unit_steps);

    if let (Some(account), Some(started)) = (desc.service_account, started) {
        let mut commands = vec![format!("chown -R {account}:{account} {data_dir}")];
        if let Some(binary) = desc.binary {
            commands.push(format!("chown {account}:{account} {}", binary(&env)));
        }
        if let Some(script_path) = &script_path {
            commands.push(format!("chown {account}:{account} {}", script_path));
        }

        let finalize = plan.add(
            scope.step("finalizeOwnership"),
            StepKind::FinalizeOwnership,
            Action::command(RemoteCommand::new(commands.join(" && "))),
            &[started],
        )?;
        steps.push(finalize);
    }

    tracing::debug!(client = name, steps = steps.len(), "Planned source deployment");

    Ok(RecipeHandle {
        name: name.to_string(),
        steps,
    })
}

/// The step installing `toolchain` on the host. Clients needing the same toolchain
/// share one step; installs of different toolchains run one after another since
/// package managers hold a host-wide lock. Returns whether the step was added.
fn toolchain_step(
    toolchain: Toolchain,
    ctx: &RecipeContext<'_>,
    plan: &mut Plan,
) -> Result<(StepId, bool)> {
    let action = Action::command(RemoteCommand::new(toolchain.install_command()));

    let installs: Vec<&Step> = plan
        .steps()
        .iter()
        .filter(|step| step.kind == StepKind::InstallToolchain)
        .collect();
    if let Some(existing) = installs.iter().find(|step| step.action == action) {
        tracing::debug!(step = %existing.id, %toolchain, "Toolchain already planned");
        return Ok((existing.id.clone(), false));
    }

    let mut deps = ctx.after.clone();
    deps.extend(installs.last().map(|step| step.id.clone()));

    let id = plan.add(
        ctx.scope.step("installToolchain"),
        StepKind::InstallToolchain,
        action,
        &deps,
    )?;
    Ok((id, true))
}
