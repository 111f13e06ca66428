//! Command lines and loader configuration for table copy jobs.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::storage::Credentials;
use crate::storage::paths::create_s3_uri;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("'{0}' file not found. Please check the utility path setting.")]
    UtilityNotFound(String),
    #[error("Failed to run the utility: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to build the loader configuration: {0}")]
    Config(#[from] serde_json::Error),
    #[error("cancelled")]
    Cancelled,
}

fn default_port() -> u16 {
    5432
}

fn default_true() -> bool {
    true
}

fn default_format() -> String {
    "csv".to_string()
}

/// Job description posted by the browser.
#[derive(Debug, Clone, Deserialize)]
pub struct ImportExportRequest {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub schema: String,
    #[serde(default)]
    pub table: String,
    #[serde(default)]
    pub columns: Vec<String>,
    /// FORCE NOT NULL columns on import, FORCE QUOTE columns on export.
    #[serde(default)]
    pub icolumns: Vec<String>,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default)]
    pub delimiter: Option<String>,
    #[serde(default)]
    pub quote: Option<String>,
    #[serde(default)]
    pub escape: Option<String>,
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub null_string: Option<String>,
    #[serde(default)]
    pub header: bool,
    #[serde(default)]
    pub is_import: bool,
    /// Local file copy through `psql` (true) or S3 copy through the loader (false).
    #[serde(default = "default_true")]
    pub is_def_ds: bool,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
}

impl ImportExportRequest {
    pub fn description(&self) -> String {
        format!(
            "Copying table data '{}.{}' on database '{}' and server ({}:{})",
            self.schema, self.table, self.database, self.host, self.port
        )
    }

    /// libpq environment for the utility process.
    pub fn env(&self) -> Vec<(&'static str, String)> {
        let mut env = vec![
            ("PGHOST", self.host.clone()),
            ("PGPORT", self.port.to_string()),
            ("PGUSER", self.username.clone()),
            ("PGDATABASE", self.database.clone()),
        ];
        if let Some(pw) = &self.password {
            env.push(("PGPASSWORD", pw.clone()));
        }
        env
    }
}

static PLAIN_IDENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_$]*$").unwrap());

/// PostgreSQL identifier quoting: lowercase simple names stay bare.
pub fn quote_ident(name: &str) -> String {
    if PLAIN_IDENT.is_match(name) {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

/// PostgreSQL string literal. Backslashes switch to the `E'...'` form.
pub fn quote_literal(value: &str) -> String {
    let escaped = value.replace('\'', "''");
    if escaped.contains('\\') {
        format!("E'{}'", escaped.replace('\\', "\\\\"))
    } else {
        format!("'{escaped}'")
    }
}

fn ident_list(columns: &[String]) -> Option<String> {
    if columns.is_empty() {
        return None;
    }
    Some(
        columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", "),
    )
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// `\copy` meta-command for `psql --command`.
pub fn copy_command(req: &ImportExportRequest, filename: &str) -> String {
    let mut cmd = format!(
        "\\copy {}.{}",
        quote_ident(&req.schema),
        quote_ident(&req.table)
    );
    if let Some(cols) = ident_list(&req.columns) {
        cmd.push_str(&format!(" ({cols})"));
    }
    cmd.push_str(if req.is_import { " FROM " } else { " TO " });
    cmd.push_str(&quote_literal(filename));

    let format = req.format.to_ascii_lowercase();
    if (format == "csv" || format == "text")
        && let Some(delim) = non_empty(&req.delimiter)
    {
        if delim == "[tab]" {
            cmd.push_str(" DELIMITER E'\\t'");
        } else {
            cmd.push_str(&format!(" DELIMITER {}", quote_literal(delim)));
        }
    }
    if format == "csv" {
        cmd.push_str(" CSV");
        if req.header {
            cmd.push_str(" HEADER");
        }
        if let Some(enc) = non_empty(&req.encoding) {
            cmd.push_str(&format!(" ENCODING {}", quote_literal(enc)));
        }
        if let Some(q) = non_empty(&req.quote) {
            cmd.push_str(&format!(" QUOTE {}", quote_literal(q)));
        }
        if let Some(e) = non_empty(&req.escape) {
            cmd.push_str(&format!(" ESCAPE {}", quote_literal(e)));
        }
        if let Some(forced) = ident_list(&req.icolumns) {
            let clause = if req.is_import { "FORCE NOT NULL" } else { "FORCE QUOTE" };
            cmd.push_str(&format!(" {clause} {forced}"));
        }
    }
    if format == "binary" {
        cmd.push_str(" BINARY");
    }
    if let Some(null) = non_empty(&req.null_string) {
        cmd.push_str(&format!(" NULL {}", quote_literal(null)));
    }
    cmd.push(';');
    cmd
}

#[derive(Serialize)]
pub struct LoaderCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl From<Credentials> for LoaderCredentials {
    fn from(c: Credentials) -> Self {
        Self {
            access_key_id: c.key_name,
            secret_access_key: c.key_secret,
        }
    }
}

/// Configuration document written to the loader's stdin.
#[derive(Serialize)]
pub struct LoaderConfig {
    pub database: String,
    pub server: String,
    pub table: String,
    pub columns: Option<String>,
    pub delimiter: Option<String>,
    pub escape: Option<String>,
    pub quote: Option<String>,
    pub format: String,
    pub file_format: &'static str,
    pub direction: &'static str,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<LoaderCredentials>,
}

impl LoaderConfig {
    pub fn new(
        req: &ImportExportRequest,
        bucket: &str,
        key: &str,
        credentials: Option<Credentials>,
    ) -> Self {
        Self {
            database: req.database.clone(),
            server: format!("{}:{}", req.host, req.port),
            table: format!("{}.{}", quote_ident(&req.schema), quote_ident(&req.table)),
            columns: ident_list(&req.columns),
            delimiter: req.delimiter.clone(),
            escape: req.escape.clone(),
            quote: req.quote.clone(),
            format: req.format.clone(),
            file_format: "text",
            direction: if req.is_import { "import" } else { "export" },
            source: create_s3_uri(bucket, key),
            credentials: credentials.map(LoaderCredentials::from),
        }
    }

    pub fn to_stdin(&self) -> Result<Vec<u8>, JobError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}

/// Resolve a utility setting to an existing file: paths are checked as given,
/// bare names are searched on `PATH`.
pub fn resolve_utility(utility: &Path) -> Result<PathBuf, JobError> {
    let not_found = || JobError::UtilityNotFound(utility.display().to_string());

    if utility.components().count() > 1 || utility.is_absolute() {
        return if utility.is_file() {
            Ok(utility.to_path_buf())
        } else {
            Err(not_found())
        };
    }

    std::env::var_os("PATH")
        .iter()
        .flat_map(std::env::split_paths)
        .map(|dir| dir.join(utility))
        .find(|candidate| candidate.is_file())
        .ok_or_else(not_found)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ImportExportRequest {
        serde_json::from_value(serde_json::json!({
            "host": "db.local",
            "database": "sales",
            "username": "etl",
            "schema": "public",
            "table": "Orders",
            "columns": ["id", "Total"],
            "delimiter": ",",
            "quote": "\"",
            "escape": "'",
            "header": true,
            "is_import": true
        }))
        .unwrap()
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("orders"), "orders");
        assert_eq!(quote_ident("Orders"), "\"Orders\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(quote_ident("1st"), "\"1st\"");
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(quote_literal("C:\\tmp"), "E'C:\\\\tmp'");
    }

    #[test]
    fn test_defaults() {
        let req: ImportExportRequest = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(req.port, 5432);
        assert_eq!(req.format, "csv");
        assert!(req.is_def_ds);
        assert!(!req.is_import);
    }

    #[test]
    fn test_copy_command_import_csv() {
        let cmd = copy_command(&request(), "/data/orders.csv");
        assert_eq!(
            cmd,
            "\\copy public.\"Orders\" (id, \"Total\") FROM '/data/orders.csv' \
             DELIMITER ',' CSV HEADER QUOTE '\"' ESCAPE '''';"
        );
    }

    #[test]
    fn test_copy_command_export_variants() {
        let mut req = request();
        req.is_import = false;
        req.columns.clear();
        req.icolumns = vec!["Total".into()];
        req.delimiter = Some("[tab]".into());
        req.quote = None;
        req.escape = None;
        req.header = false;
        req.null_string = Some("NULL".into());
        assert_eq!(
            copy_command(&req, "/tmp/o.tsv"),
            "\\copy public.\"Orders\" TO '/tmp/o.tsv' DELIMITER E'\\t' CSV \
             FORCE QUOTE \"Total\" NULL 'NULL';"
        );

        req.format = "binary".into();
        assert_eq!(
            copy_command(&req, "/tmp/o.bin"),
            "\\copy public.\"Orders\" TO '/tmp/o.bin' BINARY NULL 'NULL';"
        );
    }

    #[test]
    fn test_env_includes_password_only_when_given() {
        let mut req = request();
        assert!(req.env().iter().all(|(k, _)| *k != "PGPASSWORD"));
        req.password = Some("pw".into());
        assert!(req.env().contains(&("PGPASSWORD", "pw".to_string())));
        assert!(req.env().contains(&("PGPORT", "5432".to_string())));
    }

    #[test]
    fn test_loader_config() {
        let creds = Credentials {
            key_name: "AKIA".into(),
            key_secret: "secret".into(),
        };
        let cfg = LoaderConfig::new(&request(), "lake", "in/orders.csv", Some(creds));
        let json: serde_json::Value = serde_json::from_slice(&cfg.to_stdin().unwrap()).unwrap();
        assert_eq!(json["source"], "s3://lake/in/orders.csv");
        assert_eq!(json["table"], "public.\"Orders\"");
        assert_eq!(json["server"], "db.local:5432");
        assert_eq!(json["direction"], "import");
        assert_eq!(json["credentials"]["access_key_id"], "AKIA");

        let cfg = LoaderConfig::new(&request(), "lake", "k", None);
        let json = serde_json::to_value(&cfg).unwrap();
        assert!(json.get("credentials").is_none());
    }

    #[test]
    fn test_resolve_utility_by_path() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("dbx-pload");
        std::fs::write(&tool, "#!/bin/sh\n").unwrap();

        assert_eq!(resolve_utility(&tool).unwrap(), tool);
        let missing = dir.path().join("psql");
        let err = resolve_utility(&missing).unwrap_err();
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_resolve_utility_bare_name_missing() {
        assert!(matches!(
            resolve_utility(Path::new("definitely-not-a-real-utility-xyz")),
            Err(JobError::UtilityNotFound(_))
        ));
    }
}
