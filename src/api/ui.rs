use axum::{extract::State, response::Html};

use crate::AppState;

const INDEX_HTML: &str = include_str!("../../static/index.html");
const BACKEND_PLACEHOLDER: &str = "__BACKEND_URL__";

/// Serves the single-page UI, pointed at the configured backend.
pub async fn index(State(state): State<AppState>) -> Html<String> {
    Html(render_index(state.config.backend_url.as_deref()))
}

fn render_index(backend_url: Option<&str>) -> String {
    // Emitted as a JS string literal; empty means same origin
    let literal = serde_json::to_string(backend_url.unwrap_or("")).unwrap_or_else(|_| "\"\"".to_string());
    INDEX_HTML.replace(BACKEND_PLACEHOLDER, &literal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injects_backend_url_as_string_literal() {
        let page = render_index(Some("https://api.example.com"));
        assert!(page.contains(r#"const BACKEND_URL = "https://api.example.com";"#));
        assert!(!page.contains(BACKEND_PLACEHOLDER));
    }

    #[test]
    fn defaults_to_same_origin() {
        let page = render_index(None);
        assert!(page.contains(r#"const BACKEND_URL = "";"#));
    }
}
