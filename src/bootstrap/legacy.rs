use anyhow::Result;
use log::info;
use std::path::Path;

use super::{default_shell, render_runscript, write_mode_if_absent, BootstrapLayout};
use crate::metadata::{ensure_default_env, EnvVar, ImageMetadata};
use crate::shell;

/// Bootstrap layout for pre-2.2 Singularity: flat files in the rootfs
/// root (`/environment`, `/.shell`, `/.exec`, `/.run`, `/singularity`),
/// each written only if the image does not already carry it.
pub struct LegacyLayout;

impl BootstrapLayout for LegacyLayout {
    fn name(&self) -> &str {
        "legacy"
    }

    fn synthesize(&self, rootfs: &Path, metadata: &ImageMetadata) -> Result<()> {
        let mut env = metadata.env.clone();
        env.push(EnvVar::new(
            "PS1",
            "Singularity.$SINGULARITY_CONTAINER> $PS1",
        ));
        env.push(EnvVar::new("SINGULARITY_INIT", "1"));
        ensure_default_env(&mut env);

        info!("Singularity container environment variables:");
        for var in &env {
            info!("{}={}", var.name, shell::double_quote(&var.value));
        }

        write_mode_if_absent(&rootfs.join("environment"), &environment_file(&env), 0o644)?;

        let shell_path = default_shell(rootfs);
        info!("Using {} as default shell for container.", shell_path);

        write_mode_if_absent(&rootfs.join(".shell"), &shell_dispatcher(shell_path), 0o755)?;
        write_mode_if_absent(&rootfs.join(".exec"), &exec_dispatcher(shell_path), 0o755)?;
        write_mode_if_absent(&rootfs.join(".run"), &run_dispatcher(shell_path), 0o755)?;

        if metadata.run_cmd.is_empty() {
            info!("Singularity container has no default run cmd.");
        } else {
            let runscript = render_runscript(shell_path, &metadata.run_cmd);
            info!("Singularity container run cmd: {}", runscript.trim_end());
            write_mode_if_absent(&rootfs.join("singularity"), &runscript, 0o755)?;
        }

        Ok(())
    }
}

/// The environment file assigns every variable inside a guard on
/// `SINGULARITY_INIT`, so sourcing it a second time is a no-op, and
/// exports the whole set at once.
fn environment_file(env: &[EnvVar]) -> String {
    let mut out = String::from(
        "# Define any environment init code here\n\nif test -z \"$SINGULARITY_INIT\"; then\n",
    );
    for var in env {
        out.push_str("    ");
        out.push_str(&var.name);
        out.push('=');
        out.push_str(&shell::double_quote(&var.value));
        out.push('\n');
    }
    let names: Vec<&str> = env.iter().map(|e| e.name.as_str()).collect();
    out.push_str("    export ");
    out.push_str(&names.join(" "));
    out.push_str("\nfi\n");
    out
}

fn shell_dispatcher(shell_path: &str) -> String {
    format!(
        "#!{shell}

. /environment
SHELL={quoted}
export SHELL
if test -n \"$SHELL\" -a -x \"$SHELL\"; then
    exec \"$SHELL\" \"$@\"
else
    echo \"ERROR: Shell does not exist in container: $SHELL\" 1>&2
fi
exit 1
",
        shell = shell_path,
        quoted = shell::double_quote(shell_path)
    )
}

fn exec_dispatcher(shell_path: &str) -> String {
    format!(
        "#!{shell}
. /environment
exec \"$@\"
",
        shell = shell_path
    )
}

fn run_dispatcher(shell_path: &str) -> String {
    format!(
        "#!{shell}
. /environment
if test -x /singularity; then
    exec /singularity \"$@\"
else
    echo \"No Singularity runscript found, executing /bin/sh\"
    exec /bin/sh \"$@\"
fi
",
        shell = shell_path
    )
}
