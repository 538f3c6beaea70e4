//! Shell completion generation and installation.

use {
    crate::Cli,
    anyhow::{Context, Result},
    clap::CommandFactory,
    clap_complete::{Shell, generate},
    console::style,
    directories::BaseDirs,
    std::{
        env, fs, io,
        path::{Path, PathBuf},
    },
};

/// Write the completion script for `shell` to `out`.
fn write_completions(shell: Shell, out: &mut dyn io::Write) {
    let mut cmd = Cli::command();
    let name = cmd
        .get_name()
        .to_string();
    generate(shell, &mut cmd, name, out);
}

/// Generate shell completions to stdout.
pub(crate) fn cmd_completions(shell: Shell) {
    write_completions(shell, &mut io::stdout());
}

/// Detect the user's current shell from environment.
fn detect_shell_type() -> Option<Shell> {
    if let Ok(shell_path) = env::var("SHELL") {
        return shell_from_path(&shell_path);
    }

    if cfg!(windows) && env::var("PSModulePath").is_ok() {
        return Some(Shell::PowerShell);
    }

    None
}

fn shell_from_path(shell_path: &str) -> Option<Shell> {
    let shell_name = Path::new(shell_path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");
    match shell_name {
        "bash" => Some(Shell::Bash),
        "zsh" => Some(Shell::Zsh),
        "fish" => Some(Shell::Fish),
        "elvish" => Some(Shell::Elvish),
        "pwsh" | "powershell" => Some(Shell::PowerShell),
        _ => None,
    }
}

/// Where the completion script for `shell` is installed.
fn install_path(shell: Shell, dirs: &BaseDirs) -> Result<PathBuf> {
    let path = match shell {
        Shell::Bash => dirs
            .data_local_dir()
            .join("bash-completion/completions/foenixmgr"),
        Shell::Zsh => dirs
            .home_dir()
            .join(".zfunc/_foenixmgr"),
        Shell::Fish => dirs
            .config_dir()
            .join("fish/completions/foenixmgr.fish"),
        Shell::Elvish => dirs
            .config_dir()
            .join("elvish/lib/foenixmgr.elv"),
        Shell::PowerShell => match env::var_os("PROFILE") {
            Some(profile) => PathBuf::from(profile)
                .parent()
                .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
                .join("foenixmgr.ps1"),
            None => dirs
                .config_dir()
                .join("powershell/completions/foenixmgr.ps1"),
        },
        _ => anyhow::bail!("Unsupported shell for auto-install"),
    };
    Ok(path)
}

/// Install shell completions automatically.
pub(crate) fn cmd_completions_install(shell_arg: Option<Shell>) -> Result<()> {
    let shell = match shell_arg {
        Some(s) => s,
        None => detect_shell_type().context(
            "Could not detect your shell. Please specify it explicitly:\n  \
             foenixmgr completions --install bash",
        )?,
    };

    let dirs = BaseDirs::new().context("Could not determine home directory")?;
    let path = install_path(shell, &dirs)?;

    let mut buf = Vec::new();
    write_completions(shell, &mut buf);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::write(&path, &buf)
        .with_context(|| format!("Failed to write completion file: {}", path.display()))?;

    eprintln!(
        "{} Installed {} completions to {}",
        style("✓")
            .green()
            .bold(),
        style(format!("{shell:?}")).cyan(),
        style(path.display()).yellow()
    );

    match shell {
        Shell::Bash => {
            eprintln!(
                "To activate now: {}",
                style(format!("source {}", path.display())).cyan()
            );
        },
        Shell::Zsh => {
            eprintln!(
                "Make sure {} is in your .zshrc, then restart your shell.",
                style("fpath=(~/.zfunc $fpath)").cyan()
            );
        },
        Shell::PowerShell => {
            eprintln!(
                "Add this to your PowerShell profile: {}",
                style(format!("Import-Module {}", path.display())).cyan()
            );
        },
        _ => {},
    }

    Ok(())
}
