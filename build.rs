use std::env;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const HLSL_PATH: &str = "src/composite.hlsl";

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed={HLSL_PATH}");
    println!("cargo:rustc-check-cfg=cfg(has_precompiled_composite)");
    println!("cargo:rerun-if-env-changed=DESKTOP_COMPOSITOR_FXC_PATH");
    println!("cargo:rerun-if-env-changed=DESKTOP_COMPOSITOR_PRECOMPILE_SHADER");

    if env::var("CARGO_CFG_TARGET_OS").unwrap_or_default() != "windows" {
        return;
    }

    let hlsl_path = PathBuf::from(HLSL_PATH);
    if !hlsl_path.exists() {
        return;
    }

    // DESKTOP_COMPOSITOR_PRECOMPILE_SHADER=0 skips fxc and uses runtime D3DCompile.
    let precompile_enabled = env::var("DESKTOP_COMPOSITOR_PRECOMPILE_SHADER")
        .map(|value| !matches!(value.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off"))
        .unwrap_or(true);
    if !precompile_enabled {
        println!("cargo:warning=shader precompilation is disabled; using runtime D3DCompile");
        return;
    }

    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let vs_path = out_dir.join("composite_vs.cso");
    let ps_path = out_dir.join("composite_ps.cso");

    let compiled = compile_with_fxc(&hlsl_path, &vs_path, "vs_main", "vs_4_0")
        .and_then(|()| compile_with_fxc(&hlsl_path, &ps_path, "ps_main", "ps_4_0"));

    match compiled {
        Ok(()) => {
            println!("cargo:rustc-env=COMPOSITE_VS_CSO_PATH={}", vs_path.display());
            println!("cargo:rustc-env=COMPOSITE_PS_CSO_PATH={}", ps_path.display());
            println!("cargo:rustc-cfg=has_precompiled_composite");
        }
        Err(detail) => {
            println!("cargo:warning=failed to precompile composite shaders with fxc ({detail}); using runtime D3DCompile");
        }
    }
}

fn compile_with_fxc(hlsl_path: &Path, cso_path: &Path, entry_point: &str, profile: &str) -> Result<(), String> {
    let mut attempts = Vec::new();
    let mut attempted = false;

    for fxc in fxc_candidates() {
        if !is_path_lookup(&fxc) && !fxc.is_file() {
            continue;
        }
        attempted = true;

        match Command::new(&fxc).args(["/nologo", "/T", profile, "/E", entry_point, "/O3", "/Fo"]).arg(cso_path).arg(hlsl_path).output() {
            Ok(output) if output.status.success() => return Ok(()),
            Ok(output) => attempts.push(format!("{}: {}", fxc.display(), summarize_output(&output))),
            Err(error) => attempts.push(format!("{}: {error}", fxc.display())),
        }
    }

    if !attempted {
        return Err("no usable fxc.exe found, set DESKTOP_COMPOSITOR_FXC_PATH to an explicit path".to_string());
    }

    Err(attempts.join(" | "))
}

fn is_path_lookup(path: &Path) -> bool {
    path.parent().is_some_and(|parent| parent.as_os_str().is_empty())
        && path.file_name().is_some_and(|name| name.eq_ignore_ascii_case("fxc.exe"))
}

fn summarize_output(output: &Output) -> String {
    let status = output.status.code().map_or_else(|| "terminated".to_string(), |code| format!("exit {code}"));
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();

    let mut diagnostic = if !stderr.is_empty() {
        stderr
    } else if !stdout.is_empty() {
        stdout
    } else {
        "no compiler output".to_string()
    };
    if diagnostic.len() > 260 {
        let mut end = 260;
        while !diagnostic.is_char_boundary(end) {
            end -= 1;
        }
        diagnostic.truncate(end);
        diagnostic.push_str("...");
    }

    format!("{status}, {diagnostic}")
}

fn fxc_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if let Ok(path) = env::var("DESKTOP_COMPOSITOR_FXC_PATH") {
        let path = path.trim();
        if !path.is_empty() {
            candidates.push(PathBuf::from(path));
        }
    }

    candidates.push(PathBuf::from("fxc.exe"));

    if let Ok(bin_path) = env::var("WindowsSdkVerBinPath") {
        let bin = PathBuf::from(bin_path);
        candidates.push(bin.join("x64").join("fxc.exe"));
        candidates.push(bin.join("x86").join("fxc.exe"));
    }

    if let Ok(program_files) = env::var("ProgramFiles(x86)") {
        let bin_root = PathBuf::from(program_files).join("Windows Kits").join("10").join("bin");
        if let Ok(entries) = std::fs::read_dir(bin_root) {
            let mut versions: Vec<PathBuf> = entries.flatten().map(|entry| entry.path()).filter(|path| path.is_dir()).collect();
            // Newest SDK first.
            versions.sort_unstable_by(|a, b| b.cmp(a));

            for version in versions {
                candidates.push(version.join("x64").join("fxc.exe"));
                candidates.push(version.join("x86").join("fxc.exe"));
            }
        }
    }

    let mut unique: Vec<PathBuf> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if !unique.contains(&candidate) {
            unique.push(candidate);
        }
    }
    unique
}
