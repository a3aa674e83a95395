//! services/api/src/bin/openapi.rs
//!
//! Dumps the schedule RPA OpenAPI document. Usage: `openapi [PATH|-]`, where
//! `-` prints to stdout and the default path is `openapi.json`.

use api_lib::web::ApiDoc;
use std::io::Write;
use utoipa::OpenApi;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let target = std::env::args().nth(1).unwrap_or_else(|| "openapi.json".to_string());
    let document = ApiDoc::openapi().to_pretty_json()?;

    if target == "-" {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(document.as_bytes())?;
        stdout.write_all(b"\n")?;
        return Ok(());
    }

    std::fs::write(&target, document)?;
    eprintln!("OpenAPI document for {} routes written to {}", route_count(), target);
    Ok(())
}

fn route_count() -> usize {
    ApiDoc::openapi().paths.paths.len()
}
