// Binary Manager — relocates the bundled transcoder to a path the host OS
// will execute. Per-user temp and unpacked-asset trees are refused by some
// platforms, so the binary is copied under the user profile, marked
// executable, and probed before first use.

use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime};
use tracing::{info, warn};

use crate::constants::APP_HOME_DIR_NAME;
use crate::errors::CoreError;

const TRANSCODER_NAME: &str = if cfg!(windows) { "ffmpeg.exe" } else { "ffmpeg" };
const SENTINEL_NAME: &str = ".init-lock";
const SENTINEL_STALE_SECS: u64 = 60;
const SENTINEL_WAIT_TIMEOUT_SECS: u64 = 30;

pub struct BinaryManager {
    app_home: PathBuf,
    ready: Mutex<Option<PathBuf>>,
}

impl Default for BinaryManager {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            app_home: home.join(APP_HOME_DIR_NAME),
            ready: Mutex::new(None),
        }
    }
}

impl BinaryManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Manager rooted somewhere other than the real user profile (tests).
    pub fn with_app_home(app_home: PathBuf) -> Self {
        Self {
            app_home,
            ready: Mutex::new(None),
        }
    }

    /// Return the absolute path of a probed, executable transcoder.
    /// Idempotent; the first caller does the relocation under an exclusive
    /// sentinel lock while concurrent callers wait and observe the result.
    pub fn ensure_ready(&self) -> Result<PathBuf, CoreError> {
        {
            let ready = self.ready.lock().unwrap();
            if let Some(path) = ready.as_ref() {
                return Ok(path.clone());
            }
        }

        let source = locate_bundled_source()?;
        let bin_dir = self.app_home.join("bin");
        create_private_dir(&bin_dir)?;

        let _sentinel = SentinelLock::acquire(&bin_dir)?;

        // A waiting caller may find the work already done.
        {
            let ready = self.ready.lock().unwrap();
            if let Some(path) = ready.as_ref() {
                return Ok(path.clone());
            }
        }

        let target = bin_dir.join(TRANSCODER_NAME);
        if needs_copy(&source, &target) {
            fs::copy(&source, &target).map_err(|e| {
                CoreError::Internal(format!("cannot stage transcoder {:?}: {}", target, e))
            })?;
            set_executable(&target)?;
            match sha256_hex(&target) {
                Ok(digest) => info!("transcoder staged at {:?} (sha256 {})", target, digest),
                Err(e) => warn!("transcoder staged but digest failed: {}", e),
            }
        }

        let probed = self.probe_with_fallbacks(&source, &target)?;
        *self.ready.lock().unwrap() = Some(probed.clone());
        Ok(probed)
    }

    /// Probe chain: direct invocation, relocation to a secondary profile
    /// directory, then the platform shell wrapper. Diagnostics from every
    /// failed strategy travel with the final error.
    fn probe_with_fallbacks(&self, source: &Path, target: &Path) -> Result<PathBuf, CoreError> {
        let mut diagnostics: Vec<String> = Vec::new();

        match probe_direct(target) {
            Ok(version) => {
                info!("transcoder ready: {}", version);
                return Ok(target.to_path_buf());
            }
            Err(e) => diagnostics.push(format!("direct invocation: {}", e)),
        }

        let alt_dir = self.app_home.join("bin-local");
        match relocate_and_probe(source, &alt_dir) {
            Ok(path) => {
                warn!(
                    "transcoder refused at {:?}, using fallback location {:?}",
                    target, path
                );
                return Ok(path);
            }
            Err(e) => diagnostics.push(format!("secondary location: {}", e)),
        }

        match probe_via_shell(target) {
            Ok(version) => {
                warn!("transcoder only executable through shell wrapper: {}", version);
                return Ok(target.to_path_buf());
            }
            Err(e) => diagnostics.push(format!("shell wrapper: {}", e)),
        }

        Err(CoreError::BinaryUnexecutable(format!(
            "all strategies failed: [{}]",
            diagnostics.join("; ")
        )))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Source discovery
// ─────────────────────────────────────────────────────────────────────────────

/// Bundled transcoder lookup: environment override, exe-adjacent resources
/// directory, then the system PATH.
fn locate_bundled_source() -> Result<PathBuf, CoreError> {
    if let Ok(path) = std::env::var("MINUTESGEN_FFMPEG") {
        let candidate = PathBuf::from(path.trim());
        if candidate.is_file() {
            return Ok(candidate);
        }
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(exe_dir) = exe.parent() {
            let bundled = exe_dir.join("resources").join("ffmpeg").join(TRANSCODER_NAME);
            if bundled.is_file() {
                return Ok(bundled);
            }
        }
    }

    which::which(TRANSCODER_NAME).map_err(|_| {
        CoreError::BinaryMissing(format!(
            "no bundled {} and none on PATH; set MINUTESGEN_FFMPEG or install it",
            TRANSCODER_NAME
        ))
    })
}

fn needs_copy(source: &Path, target: &Path) -> bool {
    let Ok(target_meta) = fs::metadata(target) else {
        return true;
    };
    match fs::metadata(source) {
        Ok(source_meta) => source_meta.len() != target_meta.len(),
        Err(_) => false,
    }
}

fn create_private_dir(dir: &Path) -> Result<(), CoreError> {
    fs::create_dir_all(dir)
        .map_err(|e| CoreError::Internal(format!("cannot create {:?}: {}", dir, e)))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(dir, fs::Permissions::from_mode(0o700));
    }
    Ok(())
}

fn set_executable(path: &Path) -> Result<(), CoreError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))
            .map_err(|e| CoreError::Internal(format!("cannot chmod {:?}: {}", path, e)))?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

fn sha256_hex(path: &Path) -> Result<String, CoreError> {
    let mut file = fs::File::open(path)
        .map_err(|e| CoreError::Internal(format!("cannot open {:?}: {}", path, e)))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let n = file
            .read(&mut buffer)
            .map_err(|e| CoreError::Internal(format!("digest read failed: {}", e)))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Probes
// ─────────────────────────────────────────────────────────────────────────────

fn probe_direct(path: &Path) -> Result<String, String> {
    let output = Command::new(path)
        .arg("-version")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| format!("spawn failed: {}", e))?;
    if !output.status.success() {
        return Err(format!(
            "exit {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    first_line(&output.stdout).ok_or_else(|| "no version output".to_string())
}

fn relocate_and_probe(source: &Path, alt_dir: &Path) -> Result<PathBuf, String> {
    create_private_dir(alt_dir).map_err(|e| e.to_string())?;
    let alt = alt_dir.join(TRANSCODER_NAME);
    fs::copy(source, &alt).map_err(|e| format!("copy failed: {}", e))?;
    set_executable(&alt).map_err(|e| e.to_string())?;
    probe_direct(&alt)?;
    Ok(alt)
}

fn probe_via_shell(path: &Path) -> Result<String, String> {
    let quoted = format!("\"{}\" -version", path.display());
    let mut command = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(&quoted);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(&quoted);
        c
    };
    let output = command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| format!("shell spawn failed: {}", e))?;
    if !output.status.success() {
        return Err(format!(
            "exit {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    first_line(&output.stdout).ok_or_else(|| "no version output".to_string())
}

fn first_line(stdout: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(stdout);
    let line = text.lines().next()?.trim().to_string();
    if line.is_empty() {
        None
    } else {
        Some(line)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sentinel lock
// ─────────────────────────────────────────────────────────────────────────────

/// Exclusive first-time-initialization lock: a `create_new` sentinel file in
/// the bin directory. Stale sentinels (crashed initializer) are reclaimed
/// after a minute.
struct SentinelLock {
    path: PathBuf,
}

impl SentinelLock {
    fn acquire(bin_dir: &Path) -> Result<Self, CoreError> {
        let path = bin_dir.join(SENTINEL_NAME);
        let deadline = Instant::now() + Duration::from_secs(SENTINEL_WAIT_TIMEOUT_SECS);
        loop {
            match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if sentinel_is_stale(&path) {
                        let _ = fs::remove_file(&path);
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Err(CoreError::Internal(
                            "timed out waiting for transcoder initialization lock".to_string(),
                        ));
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }
                Err(e) => {
                    return Err(CoreError::Internal(format!(
                        "cannot acquire sentinel {:?}: {}",
                        path, e
                    )))
                }
            }
        }
    }
}

impl Drop for SentinelLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn sentinel_is_stale(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|mtime| SystemTime::now().duration_since(mtime).ok())
        .map(|age| age.as_secs() >= SENTINEL_STALE_SECS)
        .unwrap_or(false)
}
