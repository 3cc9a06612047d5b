use crate::config::{SourceConfig, SourceKind};
use crate::runner::connector_for;

/// Render the configured sources as a table for `ragbox sources`.
pub fn render_sources(sources: &[SourceConfig]) -> String {
    if sources.is_empty() {
        return "No sources configured.\n".to_string();
    }

    let mut out = format!(
        "{:<20} {:<13} {:<8} {:<40} {}\n",
        "SOURCE", "TYPE", "ENABLED", "LOCATION", "DESCRIPTION"
    );
    for source in sources {
        let connector = connector_for(source);
        out.push_str(&format!(
            "{:<20} {:<13} {:<8} {:<40} {}\n",
            source.name,
            source.source_type(),
            if source.enabled { "yes" } else { "no" },
            location(&source.kind),
            connector.description()
        ));
    }
    out
}

pub fn print_sources(sources: &[SourceConfig]) {
    print!("{}", render_sources(sources));
}

/// Where a source reads from, in one short string.
fn location(kind: &SourceKind) -> String {
    match kind {
        SourceKind::Directory(d) => d.path.display().to_string(),
        SourceKind::Url(u) => match u.urls.len() {
            1 => u.urls[0].clone(),
            n => format!("{} urls", n),
        },
        // The connection URL may carry a password; show only its scheme.
        SourceKind::Database(db) => db
            .connection_url
            .split(':')
            .next()
            .map(|scheme| format!("{}://…", scheme))
            .unwrap_or_default(),
        SourceKind::ObjectStore(s) => format!("s3://{}/{}", s.bucket, s.prefix),
        SourceKind::WebCrawl(w) => match w.seed_urls.len() {
            1 => w.seed_urls[0].clone(),
            n => format!("{} seeds", n),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    #[test]
    fn table_lists_each_source() {
        let config = parse_config(
            r#"
[[sources]]
type = "directory"
name = "docs"
path = "./docs"

[[sources]]
type = "database"
name = "kb"
enabled = false
connection_url = "postgres://admin:hunter2@db/kb"
query = "SELECT id, body FROM a"
id_column = "id"
content_column = "body"
"#,
        )
        .unwrap();

        let table = render_sources(&config.sources);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("docs"));
        assert!(lines[1].contains("directory"));
        assert!(lines[2].contains("database"));
        assert!(lines[2].contains(" no "));
        assert!(!table.contains("hunter2"));
    }

    #[test]
    fn empty_list() {
        assert_eq!(render_sources(&[]), "No sources configured.\n");
    }
}
