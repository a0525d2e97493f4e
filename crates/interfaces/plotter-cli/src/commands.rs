use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use camino::Utf8PathBuf;
use humansize::{format_size, DECIMAL};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use plotter_app_core::{device_vm, ClientSettings, PollOutcome, ReconciledState, SyncKernel};
use plotter_core::{
    CommandKind, CommandRequest, CommandState, Confirmation, DeviceStatus, NewProject, Project,
    UploadState, UploadTask, UploadTaskId,
};
use plotter_infra::{default_http_client, HttpPlotterApi};

pub type Kernel = SyncKernel<HttpPlotterApi>;

/// Kernel against `base_url`, or the environment/default URL when `None`.
pub fn connect(base_url: Option<String>, interval_ms: Option<u64>) -> Result<Kernel> {
    let mut settings = ClientSettings::from_env();
    if let Some(url) = base_url {
        settings.base_url = url;
    }
    if let Some(ms) = interval_ms {
        settings.poll_interval_ms = ms;
    }

    let client = default_http_client().context("Failed to build HTTP client")?;
    let api = HttpPlotterApi::new(client, &settings.base_url)
        .with_context(|| format!("Invalid device URL {}", settings.base_url))?
        .with_status_timeout(settings.status_timeout());
    Ok(SyncKernel::new(api, settings))
}

fn print_device(state: &ReconciledState) {
    let vm = device_vm(state);
    println!(":: Device [{}]", vm.connectivity);
    match &vm.progress {
        Some((_, pct)) => println!("   State:    {} ({pct})", vm.status_label),
        None => println!("   State:    {}", vm.status_label),
    }
    if let Some(banner) = &vm.command_banner {
        println!("   Command:  {banner}");
    }
    if let Some(project) = &vm.project_line {
        println!("   Project:  {project}");
    }
    for upload in &vm.uploads {
        println!("   Upload:   {} {}", upload.file_name, upload.detail);
    }
    if let Some(err) = &vm.error {
        println!("   Error:    {err}");
    }
}

pub async fn cmd_status(kernel: &mut Kernel) -> Result<DeviceStatus> {
    match kernel.poll_now().await {
        Some(PollOutcome::Failed { .. }) => {
            let state = kernel.state();
            let msg = state
                .last_error
                .as_ref()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| "status request failed".into());
            bail!("Device unreachable: {msg}");
        }
        _ => {
            let state = kernel.state();
            print_device(&state);
            Ok(state.status.clone())
        }
    }
}

/// Poll continuously and print every change until Ctrl-C or `limit` elapses.
pub async fn cmd_watch(
    kernel: &mut Kernel,
    project: Option<String>,
    limit: Option<Duration>,
) -> Result<()> {
    if project.is_some() {
        kernel.select_project(project);
    }
    kernel.start_polling();

    let mut last_printed = String::new();
    let deadline = limit.map(|d| tokio::time::Instant::now() + d);
    loop {
        let state = kernel.state();
        let line = format!("{:?}", device_vm(&state));
        if line != last_printed {
            print_device(&state);
            last_printed = line;
        }

        let sleep_until = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = sleep_until => break,
            open = kernel.step() => if !open { break },
        }
    }

    kernel.stop_polling();
    Ok(())
}

/// Dispatch one command. With `wait`, keep polling until the device confirms it.
pub async fn cmd_command(kernel: &mut Kernel, kind: CommandKind, wait: bool) -> Result<CommandRequest> {
    kernel.poll_now().await;

    let handle = kernel.dispatch(kind)?;
    let id = handle.id();
    println!(":: Sending {kind}...");

    let state = kernel
        .run_until(|s| s.command(id).is_some_and(|c| !c.is_pending()))
        .await;
    let mut outcome = state.command(id).cloned().unwrap_or_else(|| handle.current());

    match outcome.state {
        CommandState::Failed | CommandState::TimedOut => {
            bail!(
                "{kind} failed: {}",
                outcome.error.as_deref().unwrap_or("no response")
            );
        }
        _ => println!("   Acknowledged by device"),
    }

    if wait && !outcome.is_resolved() {
        kernel.start_polling();
        let state = kernel
            .run_until(|s| s.command(id).is_some_and(|c| c.is_resolved()))
            .await;
        kernel.stop_polling();
        if let Some(cmd) = state.command(id) {
            outcome = cmd.clone();
        }
        match outcome.confirmation {
            Some(Confirmation::Confirmed) => {
                println!("   Confirmed: device is {}", kind.expected_state())
            }
            Some(Confirmation::Unconfirmed) => eprintln!(
                "warning: device never reported {} after {kind}",
                kind.expected_state()
            ),
            _ => {}
        }
    }

    Ok(outcome)
}

pub async fn cmd_project_list(kernel: &Kernel) -> Result<Vec<Project>> {
    let projects = kernel.list_projects().await?;
    println!(":: {} project(s)", projects.len());
    for p in &projects {
        println!("   {:<24} {:<32} {} images", p.id, p.name, p.image_refs.len());
    }
    Ok(projects)
}

pub async fn cmd_project_show(kernel: &mut Kernel, project_id: &str) -> Result<Project> {
    kernel.select_project(Some(project_id.to_string()));
    let project = kernel.get_project(project_id).await?;

    println!(":: Project {}", project.id);
    println!("   Name:       {}", project.name);
    if let Some(created) = project.created_at {
        println!("   Created:    {}", created.to_rfc3339());
    }
    if !project.parameters.is_empty() {
        println!(
            "   Parameters: {}",
            serde_json::to_string(&project.parameters)?
        );
    }
    println!("   Thumbnail:  {}", kernel.thumbnail_url(&project.id)?);
    for image in &project.image_refs {
        println!("   Image:      {}", kernel.image_url(&project.id, image)?);
    }
    Ok(project)
}

pub async fn cmd_project_create(
    kernel: &Kernel,
    name: String,
    params: Vec<(String, serde_json::Value)>,
) -> Result<Project> {
    let new = params
        .into_iter()
        .fold(NewProject::named(name), |p, (k, v)| p.with_parameter(k, v));
    let created = kernel.create_project(&new).await?;
    println!(":: Created project {} ({})", created.id, created.name);
    Ok(created)
}

pub async fn cmd_project_delete(kernel: &Kernel, project_id: &str) -> Result<()> {
    kernel.delete_project(project_id).await?;
    println!(":: Deleted project {project_id}");
    Ok(())
}

/// Upload `files` to `project_id` one after another, with a progress bar per file.
pub async fn cmd_upload(
    kernel: &mut Kernel,
    project_id: &str,
    files: Vec<Utf8PathBuf>,
) -> Result<Vec<UploadTask>> {
    kernel.select_project(Some(project_id.to_string()));

    let m = MultiProgress::new();
    let style = ProgressStyle::with_template(
        "{msg:24!} {bar:40.cyan/blue} {bytes}/{total_bytes} {bytes_per_sec}",
    )
    .context("Invalid progress template")?
    .progress_chars("=>-");

    let mut bars: HashMap<UploadTaskId, ProgressBar> = HashMap::new();
    let mut order = Vec::new();
    for path in &files {
        let handle = kernel
            .enqueue_upload_file(project_id, path)
            .await
            .with_context(|| format!("Failed to queue {path}"))?;
        let task = handle.current();
        println!(
            ":: Queued {} ({})",
            task.file_name,
            format_size(task.total_bytes, DECIMAL)
        );
        let pb = m.add(ProgressBar::new(task.total_bytes));
        pb.set_style(style.clone());
        pb.set_message(task.file_name.clone());

        order.push(task.id);
        bars.insert(task.id, pb);
    }

    let state = kernel
        .run_until(|s| {
            for task in &s.uploads {
                if let Some(pb) = bars.get(&task.id) {
                    pb.set_position(task.bytes_sent);
                    if task.state.is_terminal() && !pb.is_finished() {
                        pb.finish_with_message(format!("{} {:?}", task.file_name, task.state));
                    }
                }
            }
            order.iter().all(|id| {
                s.upload(*id)
                    .is_some_and(|t| t.state.is_terminal())
            })
        })
        .await;

    let tasks: Vec<UploadTask> = order
        .iter()
        .filter_map(|id| state.upload(*id).cloned())
        .collect();
    let failed: Vec<&UploadTask> = tasks
        .iter()
        .filter(|t| t.state != UploadState::Succeeded)
        .collect();
    if !failed.is_empty() {
        for t in &failed {
            eprintln!(
                "   {} {:?}: {}",
                t.file_name,
                t.state,
                t.error.as_deref().unwrap_or("")
            );
        }
        bail!("{} of {} uploads did not complete", failed.len(), tasks.len());
    }
    Ok(tasks)
}
