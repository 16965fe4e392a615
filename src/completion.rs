//! # Shell Completion Module
//!
//! Completion scripts via `clap_complete`, plus a hidden `complete-values`
//! command that prints selectable members so shells can complete
//! `--emotion`, `--event` and `--genre` values.
//!
//! ## Usage
//!
//! ```bash
//! # Generate bash completions
//! moodtune completion bash > ~/.local/share/bash-completion/completions/moodtune
//!
//! # Generate zsh completions
//! moodtune completion zsh > ~/.config/zsh/completions/_moodtune
//! ```

use crate::cli::{ListKind, Shell};
use crate::features::AudioFeature;
use crate::selection::{Emotion, Event, Genre};
use clap::Command;
use clap_complete::{generate, Generator, Shell as CompletionShell};
use std::io::{self, Write};

/// Generate shell completions for the given shell
pub fn generate_completions<G: Generator>(gen: G, cmd: &mut Command) {
    generate(gen, cmd, cmd.get_name().to_string(), &mut io::stdout());
}

/// Convert our Shell enum to clap_complete's Shell enum
pub fn shell_to_completion_shell(shell: &Shell) -> CompletionShell {
    match shell {
        Shell::Bash => CompletionShell::Bash,
        Shell::Zsh => CompletionShell::Zsh,
        Shell::Fish => CompletionShell::Fish,
        Shell::PowerShell => CompletionShell::PowerShell,
        Shell::Elvish => CompletionShell::Elvish,
    }
}

/// Values a shell may offer for `kind`, in kebab-case.
pub fn values_for(kind: ListKind) -> Vec<String> {
    match kind {
        ListKind::Emotions => Emotion::ALL.iter().map(|m| kebab(m.name())).collect(),
        ListKind::Events => Event::ALL.iter().map(|m| kebab(m.name())).collect(),
        ListKind::Genres => Genre::ALL.iter().map(|m| kebab(m.name())).collect(),
        ListKind::Features => AudioFeature::ALL
            .iter()
            .map(|f| f.api_name().replace('_', "-"))
            .collect(),
    }
}

/// `DrumAndBass` -> `drum-and-bass`, `EDM` -> `edm`, `KPop` -> `k-pop`.
fn kebab(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in chars.iter().enumerate() {
        if c.is_uppercase() && i > 0 {
            let prev_lower = chars[i - 1].is_lowercase();
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev_lower || (next_lower && chars[i - 1].is_uppercase()) {
                out.push('-');
            }
        }
        out.extend(c.to_lowercase());
    }
    out
}

/// Print completion values, one per line
pub fn print_values(kind: ListKind) -> io::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for value in values_for(kind) {
        writeln!(out, "{value}")?;
    }
    Ok(())
}
