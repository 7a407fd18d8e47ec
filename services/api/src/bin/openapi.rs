//! services/api/src/bin/openapi.rs
//!
//! This binary generates the OpenAPI 3.0 document for the learning assistant
//! REST API and saves it to `openapi.json`, or to the path given as the first
//! argument.

use api_lib::web::ApiDoc;
use utoipa::OpenApi;

/// Generates the OpenAPI document and writes it to a file.
fn write_openapi_document(
    api_doc: utoipa::openapi::OpenApi,
    path: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let doc_json = api_doc.to_pretty_json()?;
    std::fs::write(path, doc_json)?;
    println!("OpenAPI document for {} paths written to {}", api_doc.paths.paths.len(), path);
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args().nth(1).unwrap_or_else(|| "openapi.json".to_string());
    write_openapi_document(ApiDoc::openapi(), &path)?;
    Ok(())
}
