mod cli;

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use clap::Parser;
use tracing::{info, warn};

use batchmon::config::ProjectConfig;
use batchmon::host::HostArgs;
use batchmon::install::{BuildConfig, InstallResolver};
use batchmon::launcher::{BatchJob, HostLauncher, LaunchSpec, ProcessLauncher};
use batchmon::log::{LogTarget, ProcessLog, reset_retaining_prefix, time_stamp};
use batchmon::monitor::{JobState, JobWatch, has_error, is_job_complete_with};
use batchmon::settings::Settings;
use batchmon::tail::{TailOptions, read_tail_path_with};
use cli::{Cli, Command};

fn config_source_label(config_path: Option<&Path>) -> String {
    config_path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(defaults, no .batchmon/config.toml found)".to_string())
}

fn push_kv(output: &mut String, key: &str, value: impl std::fmt::Display) {
    output.push_str(&format!("  {key:<20} {value}\n"));
}

fn opt_label<T: std::fmt::Display>(value: Option<T>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| "(none)".to_string())
}

fn path_label(path: Option<&Path>) -> String {
    opt_label(path.map(Path::display))
}

fn render_config_human(config: &ProjectConfig, config_path: Option<&Path>) -> String {
    let mut output = String::new();
    output.push_str("Host\n");
    push_kv(&mut output, "exec_dir", path_label(config.host.exec_dir.as_deref()));
    push_kv(&mut output, "data_root", path_label(config.host.data_root.as_deref()));
    push_kv(&mut output, "survey", opt_label(config.host.survey.as_deref()));
    push_kv(&mut output, "build", config.host.build.label());
    output.push('\n');

    output.push_str("Monitor\n");
    push_kv(&mut output, "marker", &config.monitor.marker);
    push_kv(&mut output, "tail_lines", config.monitor.tail_lines);
    push_kv(&mut output, "chunk_size", config.monitor.chunk_size);
    push_kv(
        &mut output,
        "poll_interval",
        format!("{}ms", config.monitor.poll_interval_millis),
    );
    push_kv(
        &mut output,
        "timeout",
        opt_label(config.monitor.timeout_secs.map(|s| format!("{s}s"))),
    );
    output.push('\n');

    output.push_str("Logs\n");
    push_kv(&mut output, "proc_log", &config.log.proc_log);
    push_kv(&mut output, "sys_log", &config.log.sys_log);
    output.push('\n');

    output.push_str("Source Path\n");
    push_kv(&mut output, "path", config_source_label(config_path));

    output
}

fn render_config_json(config: &ProjectConfig, config_path: Option<&Path>) -> Result<String> {
    let mut payload = serde_json::to_value(config).context("failed to serialize config")?;
    payload["source_path"] = serde_json::Value::String(config_source_label(config_path));
    serde_json::to_string_pretty(&payload).context("failed to serialize config to JSON")
}

fn resolve_host(
    config: &ProjectConfig,
    exec_dir: Option<PathBuf>,
) -> Result<(InstallResolver, HostArgs)> {
    let mut host = config.host.clone();
    if exec_dir.is_some() {
        host.exec_dir = exec_dir;
    }
    let resolver = InstallResolver::from_process().with_exec_dir(host.exec_dir.clone());
    let args = HostArgs::resolve(&host, &resolver, &Settings::from_process())?;
    Ok((resolver, args))
}

fn render_paths(resolver: &InstallResolver, args: &HostArgs, build: BuildConfig) -> Result<String> {
    let settings = Settings::from_process();
    let mut output = String::new();
    output.push_str("Installation\n");
    push_kv(&mut output, "software_dir", path_label(resolver.software_dir().as_deref()));
    push_kv(&mut output, "exec_dir", path_label(args.exec_dir.as_deref()));
    push_kv(&mut output, "bind_library", path_label(resolver.bind_library(build).as_deref()));
    push_kv(&mut output, "lib_dir", path_label(resolver.lib_dir(build).as_deref()));
    output.push('\n');

    output.push_str("Settings\n");
    push_kv(&mut output, "settings_dir", settings.settings_dir()?.display());
    push_kv(&mut output, "data_root", path_label(args.data_root.as_deref()));
    push_kv(&mut output, "survey", opt_label(args.survey.as_deref()));
    push_kv(&mut output, "survey_dir", path_label(args.survey_dir().as_deref()));
    Ok(output)
}

fn render_paths_json(resolver: &InstallResolver, args: &HostArgs, build: BuildConfig) -> Result<String> {
    let settings = Settings::from_process();
    let payload = serde_json::json!({
        "software_dir": resolver.software_dir(),
        "exec_dir": args.exec_dir,
        "bind_library": resolver.bind_library(build),
        "lib_dir": resolver.lib_dir(build),
        "settings_dir": settings.settings_dir()?,
        "data_root": args.data_root,
        "survey": args.survey,
        "survey_dir": args.survey_dir(),
    });
    serde_json::to_string_pretty(&payload).context("failed to serialize paths to JSON")
}

fn stop_flag() -> Result<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed))
        .context("failed to install Ctrl-C handler")?;
    Ok(stop)
}

/// Poll `watch` while `job` is alive. A job that exits without writing the
/// marker gets one last look at its log before it is reported.
fn watch_job(watch: &mut JobWatch, job: &mut BatchJob, stop: &AtomicBool, interval: std::time::Duration) -> Result<JobState> {
    loop {
        let state = watch.poll()?;
        if state.is_terminal() || stop.load(Ordering::Relaxed) {
            return Ok(state);
        }
        if let Some(code) = job.try_exit_code()? {
            let state = watch.poll()?;
            if state != JobState::Completed {
                warn!(
                    program = job.program(),
                    exit_code = ?code,
                    log_seen = watch.log_seen(),
                    "batch job exited without completion marker"
                );
            }
            return Ok(state);
        }
        std::thread::sleep(interval);
    }
}

fn default_run_log(cwd: &Path, script: &Path, at: &DateTime<Local>) -> PathBuf {
    let stem = script
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "script".to_string());
    let ts = at.format("%Y%m%d-%H%M%S");
    cwd.join(".batchmon")
        .join("logs")
        .join(format!("{stem}-{ts}.log"))
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let quiet_command = matches!(
        &cli.command,
        Command::Config { .. } | Command::Tail { .. } | Command::Check { .. } | Command::Paths { .. }
    );

    let filter = match cli.verbose {
        0 if quiet_command => "batchmon=warn",
        0 => "batchmon=info",
        1 => "batchmon=debug",
        _ => "batchmon=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cwd = std::env::current_dir().context("failed to get current directory (was it deleted?)")?;
    let (config, config_path) = ProjectConfig::load(&cwd)?;

    match config_path {
        Some(ref p) => info!("loaded config from {}", p.display()),
        None => info!("no .batchmon/config.toml found, using defaults"),
    }

    match cli.command {
        Command::Tail {
            file,
            lines,
            strip_blank,
        } => {
            let options = TailOptions::new(lines.unwrap_or(config.monitor.tail_lines), strip_blank)
                .with_chunk_size(config.monitor.chunk_size);
            for line in read_tail_path_with(&file, &options)? {
                println!("{line}");
            }
        }
        Command::Check { file, marker } => {
            let marker = marker.unwrap_or_else(|| config.monitor.marker.clone());
            if is_job_complete_with(&file, &marker, config.monitor.chunk_size)? {
                println!("complete");
            } else {
                println!("not complete");
                return Ok(ExitCode::from(1));
            }
        }
        Command::Wait {
            file,
            marker,
            interval_ms,
            timeout_secs,
        } => {
            let marker = marker.unwrap_or_else(|| config.monitor.marker.clone());
            let interval = interval_ms
                .map(std::time::Duration::from_millis)
                .unwrap_or_else(|| config.monitor.poll_interval());
            let timeout = timeout_secs
                .map(std::time::Duration::from_secs)
                .or_else(|| config.monitor.timeout());

            let stop = stop_flag()?;
            let mut watch = JobWatch::new(&file, &marker)
                .with_poll_interval(interval)
                .with_chunk_size(config.monitor.chunk_size)
                .with_timeout(timeout);
            watch.started();
            let state = watch.wait(&stop)?;
            println!("{}", state.label());
            if state != JobState::Completed {
                if !watch.log_seen() {
                    println!("log never appeared: {}", file.display());
                }
                return Ok(ExitCode::from(1));
            }
        }
        Command::Reset { file, keep } => {
            reset_retaining_prefix(&file, keep)?;
            println!("reset {} (kept {keep} lines)", file.display());
        }
        Command::Run {
            script,
            log,
            wait,
            exec_dir,
        } => {
            let log_path = log.unwrap_or_else(|| default_run_log(&cwd, &script, &Local::now()));
            if let Some(parent) = log_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create log directory: {}", parent.display()))?;
            }
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)
                .with_context(|| format!("failed to create log file: {}", log_path.display()))?;

            let proc_log = ProcessLog::open("proclog", LogTarget::File(log_path.clone()))?;
            proc_log.reset(0)?;
            proc_log.log_parts(&[&time_stamp(false, true), &"running", &script.display()])?;
            let sys_log = ProcessLog::open("syslog", LogTarget::parse(&config.log.sys_log))?;

            let (resolver, args) = resolve_host(&config, exec_dir)?;
            let args = args.with_logs(&proc_log, &sys_log);
            let launcher = HostLauncher::new(&args, &resolver)?;
            let spec = LaunchSpec::script(&script).args(args.command_args());
            let mut job = launcher.launch(&spec, &proc_log)?;
            sys_log.log_msg(format!(
                "started {} (pid {}), log: {}",
                script.display(),
                job.id(),
                log_path.display()
            ))?;

            if !wait {
                println!("[batchmon] started {} (pid: {})", script.display(), job.id());
                println!("[batchmon] log: {}", log_path.display());
                return Ok(ExitCode::SUCCESS);
            }

            let stop = stop_flag()?;
            let mut watch = JobWatch::new(&log_path, &config.monitor.marker)
                .with_poll_interval(config.monitor.poll_interval())
                .with_chunk_size(config.monitor.chunk_size)
                .with_timeout(config.monitor.timeout());
            watch.started();
            let state = watch_job(&mut watch, &mut job, &stop, config.monitor.poll_interval())?;
            println!("{}", state.label());

            if state != JobState::Completed {
                return Ok(ExitCode::from(1));
            }
            if has_error(&log_path)? {
                warn!(log = %log_path.display(), "batch job log reports errors");
                return Ok(ExitCode::from(2));
            }
        }
        Command::Paths { exec_dir, json } => {
            let (resolver, args) = resolve_host(&config, exec_dir)?;
            if json {
                println!("{}", render_paths_json(&resolver, &args, config.host.build)?);
            } else {
                print!("{}", render_paths(&resolver, &args, config.host.build)?);
            }
        }
        Command::Config { json } => {
            if json {
                println!("{}", render_config_json(&config, config_path.as_deref())?);
            } else {
                print!("{}", render_config_human(&config, config_path.as_deref()));
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn render_config_human_groups_sections() {
        let config = ProjectConfig::default();
        let rendered = render_config_human(&config, None);

        assert!(rendered.contains("Host"));
        assert!(rendered.contains("Monitor"));
        assert!(rendered.contains("Logs"));
        assert!(rendered.contains("Source Path"));
        assert!(rendered.contains("Finished batch processing"));
        assert!(rendered.contains("1000ms"));
        assert!(rendered.contains("(defaults, no .batchmon/config.toml found)"));
    }

    #[test]
    fn render_config_json_is_valid_and_contains_expected_fields() {
        let config = ProjectConfig::default();
        let json = render_config_json(&config, None).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["host"]["build"], "auto");
        assert_eq!(value["monitor"]["marker"], "Finished batch processing");
        assert_eq!(value["monitor"]["tail_lines"], 10);
        assert!(value["monitor"]["timeout_secs"].is_null());
        assert_eq!(value["log"]["proc_log"], "<stdout>");
        assert_eq!(
            value["source_path"],
            "(defaults, no .batchmon/config.toml found)"
        );
    }

    #[test]
    fn default_run_log_lives_under_batchmon_logs() {
        let at = Local.with_ymd_and_hms(2024, 3, 7, 14, 5, 9).unwrap();
        let path = default_run_log(
            Path::new("/work"),
            Path::new("/scripts/export_horizon.cmd"),
            &at,
        );
        assert_eq!(
            path,
            PathBuf::from("/work/.batchmon/logs/export_horizon-20240307-140509.log")
        );
    }
}
