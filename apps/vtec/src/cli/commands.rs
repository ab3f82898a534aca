//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use super::Cli;
use crate::api::{self, AppState};
use crate::remote::RemoteStore;
use std::path::{Path, PathBuf};
use std::time::Duration;
use vtec_core::time::{now_ms, parse_rfc3339, to_rfc3339};
use vtec_core::vtec::{HVTEC_STRING_LEN, VTEC_STRING_LEN};
use vtec_core::{
    AnalysisRequest, ConfigSource, HydroVtec, Phensig, PolicyWarning, ProductClass, RecordQuery,
    RecordStore, StoreBackend, TableSqueezer, VtecConfig, VtecError, VtecProcessor, VtecRecord,
    VtecString,
};

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum request file size (16 MB).
const MAX_REQUEST_FILE_SIZE: u64 = 16 * 1024 * 1024;

/// How long the service waits for the store's file lock before failing a call.
const SERVICE_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Validate file path and size before reading.
fn validate_file(path: &Path, max_size: u64) -> Result<PathBuf, VtecError> {
    let canonical = path.canonicalize().map_err(|e| {
        VtecError::Input(format!("Invalid file path '{}': {}", path.display(), e))
    })?;
    let metadata = std::fs::metadata(&canonical)
        .map_err(|e| VtecError::Input(format!("Cannot read file metadata: {}", e)))?;
    if !metadata.is_file() {
        return Err(VtecError::Input(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }
    if metadata.len() > max_size {
        return Err(VtecError::Input(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(canonical)
}

// =============================================================================
// CONTEXT
// =============================================================================

/// Global options every command sees.
#[derive(Debug, Clone)]
pub struct Context {
    pub store: PathBuf,
    pub backend: String,
    pub url: String,
    pub config: Option<PathBuf>,
    pub json_mode: bool,
    pub quiet: bool,
}

impl Context {
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            store: cli.store.clone(),
            backend: cli.backend.clone(),
            url: cli.url.clone(),
            config: cli.config.clone(),
            json_mode: cli.json_mode,
            quiet: cli.quiet,
        }
    }

    fn is_remote(&self) -> bool {
        self.backend.eq_ignore_ascii_case("remote")
    }

    /// `--config`, else `LOCALIZATION_DATA_SOURCE`.
    pub fn load_config(&self) -> Result<VtecConfig, VtecError> {
        let source = match &self.config {
            Some(path) => ConfigSource::File(path.clone()),
            None => ConfigSource::from_env(),
        };
        tracing::debug!(?source, "loading configuration");
        source.load()
    }

    /// Open the selected backend.
    pub fn open_store(&self) -> Result<Box<dyn RecordStore + Send>, VtecError> {
        if self.is_remote() {
            return Ok(Box::new(RemoteStore::new(
                self.url.clone(),
                api::get_api_key_from_env(),
            )?));
        }
        let backend: StoreBackend = self.backend.parse()?;
        backend.open(&self.store)
    }

    fn say(&self, line: impl AsRef<str>) {
        if !self.quiet {
            println!("{}", line.as_ref());
        }
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<(), VtecError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| VtecError::Serialization(e.to_string()))?;
    println!("{}", text);
    Ok(())
}

fn print_warnings(warnings: &[PolicyWarning]) {
    for warning in warnings {
        eprintln!("warning: {}", warning);
    }
}

fn print_records(records: &[VtecRecord]) {
    for r in records {
        println!(
            "{:<8} {} {}.{} {:04} {:<3} {}",
            r.geo_id, r.product_class, r.phen, r.sig, r.etn, r.act, r.vtecstr
        );
    }
}

/// Load a request file, optionally overriding its creation time.
pub fn read_request(file: &Path, creation_time: Option<&str>) -> Result<AnalysisRequest, VtecError> {
    let path = validate_file(file, MAX_REQUEST_FILE_SIZE)?;
    let bytes = std::fs::read(&path)
        .map_err(|e| VtecError::Input(format!("read {}: {}", path.display(), e)))?;
    let mut request: AnalysisRequest = serde_json::from_slice(&bytes)
        .map_err(|e| VtecError::Input(format!("{}: {}", path.display(), e)))?;
    if let Some(time) = creation_time {
        request.creation_time = parse_rfc3339(time)?;
    }
    Ok(request)
}

// =============================================================================
// ANALYZE / ISSUE
// =============================================================================

/// Preview the analyzed table for a request.
pub fn cmd_analyze(ctx: &Context, file: &Path, creation_time: Option<&str>) -> Result<(), VtecError> {
    let config = ctx.load_config()?;
    let request = read_request(file, creation_time)?;
    let mut store = ctx.open_store()?;
    let outcome = VtecProcessor::new(&config).preview(store.as_mut(), &request)?;

    print_warnings(&outcome.warnings);
    if ctx.json_mode {
        return print_json(&outcome);
    }
    ctx.say(format!(
        "{} {} at {}: {} analyzed record(s)",
        request.site_id4,
        request.product_category,
        to_rfc3339(request.creation_time),
        outcome.analyzed.len()
    ));
    print_records(&outcome.analyzed);
    Ok(())
}

/// Analyze and merge a request into the store.
pub fn cmd_issue(ctx: &Context, file: &Path, creation_time: Option<&str>) -> Result<(), VtecError> {
    let config = ctx.load_config()?;
    let request = read_request(file, creation_time)?;
    let mut store = ctx.open_store()?;
    let outcome = VtecProcessor::new(&config).issue(store.as_mut(), &request)?;

    print_warnings(&outcome.merge.warnings);
    if ctx.json_mode {
        return print_json(&outcome);
    }
    print_records(&outcome.analyzed);
    if outcome.merge.db_changed {
        ctx.say(format!(
            "store updated: {} decoded, {} replaced, {} purged, {} total",
            outcome.merge.decoded_records.len(),
            outcome.merge.replaced_records.len(),
            outcome.merge.purged_records.len(),
            outcome.merge.updated_vtec_records.len()
        ));
    } else {
        ctx.say("store unchanged");
    }
    Ok(())
}

// =============================================================================
// RECORDS
// =============================================================================

fn split_list(list: Option<&str>) -> Vec<String> {
    list.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

/// Build a record query from command-line filters.
pub fn build_query(
    office: Option<String>,
    phensigs: Option<&str>,
    zones: Option<&str>,
    mode: Option<&str>,
) -> Result<RecordQuery, VtecError> {
    let phensigs = split_list(phensigs)
        .iter()
        .map(|s| s.parse::<Phensig>())
        .collect::<Result<Vec<_>, _>>()?;
    let product_class = mode.map(str::parse::<ProductClass>).transpose()?;
    Ok(RecordQuery {
        office,
        phensigs,
        geo_ids: split_list(zones),
        product_class,
    })
}

/// List stored records.
pub fn cmd_records(
    ctx: &Context,
    office: Option<String>,
    phensigs: Option<&str>,
    zones: Option<&str>,
    mode: Option<&str>,
) -> Result<(), VtecError> {
    let query = build_query(office, phensigs, zones, mode)?;
    let mut store = ctx.open_store()?;
    let records = store.get_records(&query, false)?;
    if ctx.json_mode {
        return print_json(&records);
    }
    print_records(&records);
    ctx.say(format!("{} record(s)", records.len()));
    Ok(())
}

// =============================================================================
// SQUEEZE
// =============================================================================

/// Purge the store as of `now`.
pub fn cmd_squeeze(ctx: &Context, now: Option<&str>, dry_run: bool) -> Result<(), VtecError> {
    let config = ctx.load_config()?;
    let now = now.map(parse_rfc3339).transpose()?.unwrap_or_else(now_ms);
    let mut store = ctx.open_store()?;

    let records = store.get_records(&RecordQuery::all(), !dry_run)?;
    let result = TableSqueezer::new(&config).squeeze(records, now);
    let changed = !result.purged.is_empty() || !result.modified.is_empty();
    if !dry_run {
        if changed {
            store.put_records(&result.kept, false)?;
        } else {
            store.release_lock()?;
        }
    }

    if ctx.json_mode {
        return print_json(&result);
    }
    ctx.say(format!(
        "{}: {} kept, {} purged, {} cancelled as stale",
        if dry_run { "dry run" } else { "squeezed" },
        result.kept.len(),
        result.purged.len(),
        result.modified.len()
    ));
    Ok(())
}

// =============================================================================
// DECODE
// =============================================================================

/// Parse each VTEC or H-VTEC string and print its fields.
pub fn cmd_decode(ctx: &Context, strings: &[String]) -> Result<(), VtecError> {
    let mut decoded = Vec::with_capacity(strings.len());
    for s in strings {
        let s = s.trim();
        let value = match s.len() {
            VTEC_STRING_LEN => {
                let v: VtecString = s.parse()?;
                serde_json::json!({
                    "vtec": s,
                    "productClass": v.product_class,
                    "action": v.action,
                    "office": v.office,
                    "phensig": v.phensig,
                    "etn": v.etn,
                    "begin": v.begin.map(to_rfc3339),
                    "end": v.end.map(to_rfc3339),
                })
            }
            HVTEC_STRING_LEN => {
                let h: HydroVtec = s.parse()?;
                serde_json::json!({ "hvtec": s, "hydro": h })
            }
            n => {
                return Err(VtecError::Input(format!(
                    "'{}' is {} characters; VTEC strings are {} and H-VTEC strings {}",
                    s, n, VTEC_STRING_LEN, HVTEC_STRING_LEN
                )));
            }
        };
        decoded.push(value);
    }

    if ctx.json_mode {
        return print_json(&decoded);
    }
    for value in &decoded {
        let text = serde_json::to_string_pretty(value)
            .map_err(|e| VtecError::Serialization(e.to_string()))?;
        println!("{}", text);
    }
    Ok(())
}

// =============================================================================
// CLEAR / INIT
// =============================================================================

/// Empty the store.
pub fn cmd_clear(ctx: &Context) -> Result<(), VtecError> {
    ctx.open_store()?.clear()?;
    ctx.say("record store cleared");
    Ok(())
}

/// Create an empty store; refuses to touch an existing one without `force`.
pub fn cmd_init(ctx: &Context, force: bool) -> Result<(), VtecError> {
    if ctx.is_remote() {
        return Err(VtecError::Config(
            "init applies to local stores; use clear for the remote service".to_string(),
        ));
    }
    if ctx.store.exists() && !force {
        return Err(VtecError::Config(format!(
            "store {} already exists (use --force to reinitialize)",
            ctx.store.display()
        )));
    }
    let mut store = ctx.open_store()?;
    store.clear()?;
    ctx.say(format!(
        "initialized empty {} store at {}",
        ctx.backend,
        ctx.store.display()
    ));
    Ok(())
}

// =============================================================================
// SERVE
// =============================================================================

/// Run the HTTP record-store service over the local store.
pub fn cmd_serve(ctx: &Context, host: &str, port: u16) -> Result<(), VtecError> {
    if ctx.is_remote() {
        return Err(VtecError::Config(
            "the service needs a local backend (json or redb)".to_string(),
        ));
    }
    let backend: StoreBackend = ctx.backend.parse()?;
    let store = backend.open_with_lock_timeout(&ctx.store, Some(SERVICE_LOCK_TIMEOUT))?;
    let state = AppState::new(store).with_lease(api::get_lock_lease_from_env());

    ctx.say(format!(
        "VTEC record-store service: {} store at {}",
        backend,
        ctx.store.display()
    ));
    ctx.say(format!("Listening on http://{}:{} (Ctrl+C to stop)", host, port));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| VtecError::Transport(format!("runtime: {}", e)))?;
    let addr = format!("{}:{}", host, port);
    runtime.block_on(api::run_server(&addr, state))
}
