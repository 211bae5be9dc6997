//! giapha-cli: command-line client for the Giapha HTTP API
//!
//! # Subcommands
//! - `search <query> [-n <limit>] [--json]`   search the merged family graph
//! - `show <id> [--json]`                     one person with resolved relatives
//! - `branches [--json]`                      branch list and live status
//! - `switch <branch>`                        change the server's current branch
//! - `add-child <parent-id> <name> [--position <label>]`
//! - `delete <id>`                            delete and unlink a person
//! - `cleanup [--name <name>]`                wrong-branch or same-name cleanup
//! - `status`                                 server health

use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::Value;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8780";
const DEFAULT_LIMIT: usize = 20;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "giapha-cli", version, about = "Giapha family graph client")]
struct Cli {
    /// Giapha HTTP server URL (overrides GIAPHA_HTTP_URL env var)
    #[arg(long, env = "GIAPHA_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    /// Print the raw JSON response
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Search people by name, address, phone or generation number
    Search {
        query: String,

        #[arg(short = 'n', long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,
    },

    /// Show one person with parents, spouse, siblings and children
    Show { id: String },

    /// List branches with record counts and health
    Branches,

    /// Select the server's current branch
    Switch { branch: String },

    /// Add a child under an existing parent
    AddChild {
        parent_id: String,
        name: String,

        /// Birth-order label, e.g. "con trưởng"
        #[arg(long)]
        position: Option<String>,
    },

    /// Delete a person and remove references to them
    Delete { id: String },

    /// Remove misplaced records, or collapse duplicates sharing a name
    Cleanup {
        #[arg(long)]
        name: Option<String>,
    },

    /// Show server health
    Status,
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonSummary {
    pub id: String,
    pub name: String,
    pub generation: u32,
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub total: usize,
    pub results: Vec<PersonSummary>,
}

#[derive(Debug, Deserialize)]
pub struct RelativesResponse {
    pub person: PersonSummary,
    pub father: Option<PersonSummary>,
    pub mother: Option<PersonSummary>,
    pub spouse: Option<PersonSummary>,
    #[serde(default)]
    pub siblings: Vec<PersonSummary>,
    #[serde(default)]
    pub children: Vec<PersonSummary>,
}

#[derive(Debug, Deserialize)]
pub struct BranchStatus {
    pub key: String,
    pub label: String,
    pub records: usize,
    pub degraded: bool,
    pub live: bool,
    pub last_error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BranchesResponse {
    pub current: String,
    pub statuses: Vec<BranchStatus>,
}

// ============================================================================
// Formatting
// ============================================================================

/// `doi2-an  Đỗ Văn An (đời 2, con trưởng)`
pub fn person_line(p: &PersonSummary) -> String {
    let mut detail = format!("đời {}", p.generation);
    if let Some(position) = p.position.as_deref().filter(|s| !s.is_empty()) {
        detail.push_str(", ");
        detail.push_str(position);
    }
    format!("{:<24} {} ({})", p.id, p.name, detail)
}

pub fn format_search(resp: &SearchResponse) -> String {
    if resp.results.is_empty() {
        return format!("No results found for: {}", resp.query);
    }
    let mut out = String::new();
    for p in &resp.results {
        out.push_str(&person_line(p));
        if let Some(address) = p.address.as_deref() {
            out.push_str(&format!("\n    {}", address));
        }
        out.push('\n');
    }
    if resp.total > resp.results.len() {
        out.push_str(&format!("... {} of {} shown\n", resp.results.len(), resp.total));
    }
    out
}

pub fn format_relatives(r: &RelativesResponse) -> String {
    let mut out = person_line(&r.person);
    out.push('\n');
    for (label, person) in [("Cha", &r.father), ("Mẹ", &r.mother), ("Vợ/Chồng", &r.spouse)] {
        if let Some(p) = person {
            out.push_str(&format!("  {:<10} {}\n", label, person_line(p)));
        }
    }
    for (label, group) in [("Anh chị em", &r.siblings), ("Con", &r.children)] {
        if group.is_empty() {
            continue;
        }
        out.push_str(&format!("  {}:\n", label));
        for p in group {
            out.push_str(&format!("    {}\n", person_line(p)));
        }
    }
    out
}

pub fn format_branches(resp: &BranchesResponse) -> String {
    let mut out = String::new();
    for s in &resp.statuses {
        let marker = if s.key == resp.current { '*' } else { ' ' };
        let health = match (s.degraded, s.live) {
            (true, _) => "degraded",
            (false, true) => "live",
            (false, false) => "connecting",
        };
        out.push_str(&format!(
            "{} {:<12} {:<24} {:>5} records  {}",
            marker, s.key, s.label, s.records, health
        ));
        if let Some(err) = s.last_error.as_deref() {
            out.push_str(&format!("  ({})", err));
        }
        out.push('\n');
    }
    out
}

// ============================================================================
// HTTP Client
// ============================================================================

pub struct ApiClient {
    base: String,
    http: reqwest::blocking::Client,
}

impl ApiClient {
    pub fn new(server: &str) -> anyhow::Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            base: server.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn get(&self, path: &str) -> anyhow::Result<Value> {
        self.send(self.http.get(format!("{}{}", self.base, path)))
    }

    pub fn post(&self, path: &str, body: &Value) -> anyhow::Result<Value> {
        self.send(self.http.post(format!("{}{}", self.base, path)).json(body))
    }

    pub fn delete(&self, path: &str) -> anyhow::Result<Value> {
        self.send(self.http.delete(format!("{}{}", self.base, path)))
    }

    /// Non-2xx answers become errors carrying the server's message.
    fn send(&self, req: reqwest::blocking::RequestBuilder) -> anyhow::Result<Value> {
        let resp = req
            .send()
            .map_err(|e| anyhow::anyhow!("connection to {} failed: {}", self.base, e))?;
        let status = resp.status();
        let body: Value = resp.json().unwrap_or(Value::Null);
        if !status.is_success() {
            let msg = body["error"].as_str().unwrap_or("no error message");
            anyhow::bail!("server returned {}: {}", status, msg);
        }
        Ok(body)
    }
}

/// Percent-encodes a path segment or query value.
pub fn encode_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for b in raw.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

// ============================================================================
// Commands
// ============================================================================

fn run(api: &ApiClient, command: Commands, json: bool) -> anyhow::Result<String> {
    let body = match command {
        Commands::Search { query, limit } => {
            let path = format!("/search?q={}&limit={}", encode_component(&query), limit);
            let body = api.get(&path)?;
            if !json {
                return Ok(format_search(&serde_json::from_value(body)?));
            }
            body
        }
        Commands::Show { id } => {
            let body = api.get(&format!("/people/{}/relations", encode_component(&id)))?;
            if !json {
                return Ok(format_relatives(&serde_json::from_value(body)?));
            }
            body
        }
        Commands::Branches => {
            let body = api.get("/branches")?;
            if !json {
                return Ok(format_branches(&serde_json::from_value(body)?));
            }
            body
        }
        Commands::Switch { branch } => {
            let body = api.post("/branches/current", &serde_json::json!({ "branch": branch }))?;
            if !json {
                let degraded = if body["degraded"] == true { " (degraded, seed data)" } else { "" };
                return Ok(format!(
                    "Current branch: {} with {} records{}",
                    body["current"].as_str().unwrap_or("?"),
                    body["records"],
                    degraded
                ));
            }
            body
        }
        Commands::AddChild {
            parent_id,
            name,
            position,
        } => {
            let body = api.post(
                &format!("/people/{}/children", encode_component(&parent_id)),
                &serde_json::json!({ "name": name, "position": position }),
            )?;
            if !json {
                let child: PersonSummary = serde_json::from_value(body)?;
                return Ok(format!("Added {}", person_line(&child)));
            }
            body
        }
        Commands::Delete { id } => {
            let body = api.delete(&format!("/people/{}", encode_component(&id)))?;
            if !json {
                return Ok(format!("Deleted {}", id));
            }
            body
        }
        Commands::Cleanup { name } => {
            let body = api.post("/maintenance/cleanup", &serde_json::json!({ "name": name }))?;
            if !json {
                return Ok(format!(
                    "Cleanup ({}): {} records removed",
                    body["mode"].as_str().unwrap_or("?"),
                    body["removed"]
                ));
            }
            body
        }
        Commands::Status => {
            let body = api.get("/health")?;
            if !json {
                return Ok(format!(
                    "Giapha server: {}\nVersion:       {}\nBackend:       {}\nBranch:        {}\nPostgreSQL:    {}",
                    body["status"].as_str().unwrap_or("unknown"),
                    body["version"].as_str().unwrap_or("?"),
                    body["backend"].as_str().unwrap_or("?"),
                    body["current_branch"].as_str().unwrap_or("?"),
                    body["postgresql"].as_str().unwrap_or("n/a"),
                ));
            }
            body
        }
    };
    Ok(serde_json::to_string_pretty(&body)?)
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();

    let result = ApiClient::new(&cli.server).and_then(|api| run(&api, cli.command, cli.json));

    match result {
        Ok(output) => println!("{}", output.trim_end()),
        Err(e) => {
            eprintln!("giapha-cli: {}", e);
            std::process::exit(1);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
