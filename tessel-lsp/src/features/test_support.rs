use tower_lsp::lsp_types::Url;

use crate::cache::Document;

pub(crate) const SAMPLE: &str = r#"// Sample service definition
local replicas = 3,
      port(base) = base + 80;
local name = "api";
{
  service: name,
  replicas: std.max(replicas, 1),
  port: port(8000),
}
"#;

pub(crate) fn sample_uri() -> Url {
    Url::parse("file:///workspace/service.tsl").unwrap()
}

pub(crate) fn sample_document() -> Document {
    let document = Document::parse(sample_uri(), SAMPLE.to_string(), 1);
    assert!(document.ast().is_some(), "sample document must parse");
    document
}
