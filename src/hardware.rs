//! Host hardware detection for `solo setup`.

use comfy_table::{presets::UTF8_FULL, Cell, Table};
use std::process::{Command, Stdio};
use sysinfo::System;

use crate::config::HardwareProfile;

/// A detected GPU.
#[derive(Debug, Clone, PartialEq)]
pub struct GpuInfo {
    pub vendor: String,
    pub model: String,
    pub memory_gb: Option<f64>,
    pub compute_backend: &'static str,
}

/// Detect CPU, memory, OS and GPU of this machine.
///
/// `use_gpu` is set when a usable GPU is found; the operator can still turn
/// it off during setup.
pub fn detect() -> HardwareProfile {
    let mut sys = System::new_all();
    sys.refresh_all();

    let cpu_model = sys
        .cpus()
        .first()
        .map(|cpu| cpu.brand().trim().to_string())
        .filter(|brand| !brand.is_empty());
    let cpu_cores = u32::try_from(sys.cpus().len()).ok().filter(|n| *n > 0);
    let memory_gb = Some(round1(sys.total_memory() as f64 / GIB)).filter(|m| *m > 0.0);
    let os = System::long_os_version().or_else(System::name);

    let gpu = detect_nvidia().or_else(|| detect_apple(cpu_model.as_deref()));
    log::info!("Detected GPU: {:?}", gpu);

    HardwareProfile {
        use_gpu: gpu.is_some(),
        cpu_model,
        cpu_cores,
        memory_gb,
        gpu_vendor: gpu.as_ref().map(|g| g.vendor.clone()),
        gpu_model: gpu.as_ref().map(|g| g.model.clone()),
        gpu_memory: gpu.as_ref().and_then(|g| g.memory_gb),
        compute_backend: Some(
            gpu.as_ref()
                .map_or("CPU", |g| g.compute_backend)
                .to_string(),
        ),
        os,
    }
}

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

fn detect_nvidia() -> Option<GpuInfo> {
    let output = Command::new("nvidia-smi")
        .args(["--query-gpu=name,memory.total", "--format=csv,noheader,nounits"])
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .ok()?;
    if !output.status.success() {
        log::debug!("nvidia-smi exited with {:?}", output.status.code());
        return None;
    }
    parse_nvidia_smi(&String::from_utf8_lossy(&output.stdout))
}

/// Parse `nvidia-smi --query-gpu=name,memory.total --format=csv,noheader,nounits`.
///
/// Only the first GPU is reported. Memory is given in MiB.
pub fn parse_nvidia_smi(csv: &str) -> Option<GpuInfo> {
    let line = csv.lines().map(str::trim).find(|l| !l.is_empty())?;
    let (name, memory) = match line.rsplit_once(',') {
        Some((name, memory)) => (name.trim(), memory.trim().parse::<f64>().ok()),
        None => (line, None),
    };
    if name.is_empty() {
        return None;
    }
    Some(GpuInfo {
        vendor: "NVIDIA".to_string(),
        model: name.to_string(),
        memory_gb: memory.map(|mib| round1(mib / 1024.0)),
        compute_backend: "CUDA",
    })
}

fn detect_apple(cpu_brand: Option<&str>) -> Option<GpuInfo> {
    if !(cfg!(target_os = "macos") && cfg!(target_arch = "aarch64")) {
        return None;
    }
    apple_gpu(cpu_brand.unwrap_or("Apple Silicon"))
}

/// Apple silicon GPUs share the CPU's name and unified memory.
fn apple_gpu(cpu_brand: &str) -> Option<GpuInfo> {
    cpu_brand.starts_with("Apple").then(|| GpuInfo {
        vendor: "Apple".to_string(),
        model: cpu_brand.to_string(),
        memory_gb: None,
        compute_backend: "Metal",
    })
}

/// Print a hardware profile as a two-column table.
pub fn print_profile(profile: &HardwareProfile) {
    let unknown = || "unknown".to_string();
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec!["Hardware", "Value"]);
    let rows = [
        ("CPU", profile.cpu_model.clone().unwrap_or_else(unknown)),
        ("Cores", profile.cpu_cores.map_or_else(unknown, |n| n.to_string())),
        ("Memory", profile.memory_gb.map_or_else(unknown, |m| format!("{} GB", m))),
        ("OS", profile.os.clone().unwrap_or_else(unknown)),
        (
            "GPU",
            match (&profile.gpu_vendor, &profile.gpu_model) {
                (Some(vendor), Some(model)) if model.starts_with(vendor.as_str()) => model.clone(),
                (Some(vendor), Some(model)) => format!("{} {}", vendor, model),
                _ => "none".to_string(),
            },
        ),
        ("GPU memory", profile.gpu_memory.map_or_else(|| "-".to_string(), |m| format!("{} GB", m))),
        ("Backend", profile.compute_backend.clone().unwrap_or_else(unknown)),
        ("Use GPU", if profile.use_gpu { "yes" } else { "no" }.to_string()),
    ];
    for (name, value) in rows {
        table.add_row(vec![Cell::new(name), Cell::new(value)]);
    }
    println!("{table}");
}
