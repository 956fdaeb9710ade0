use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;

/// Elements whose text never reaches the reader.
const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

static BLANK_RUNS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\n\s*\n+").expect("Failed to compile blank-line pattern")
});

/// Converts rendered markup into the plain text a visitor would read.
///
/// Text nodes are joined with `\n`, any run of blank lines collapses to one,
/// and the result is trimmed. Malformed markup is parsed best-effort.
pub fn html_to_text(markup: &str) -> String {
    let document = Html::parse_document(markup);

    let mut joined = String::with_capacity(markup.len() / 2);
    let mut first = true;

    for node in document.tree.root().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };

        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|el| HIDDEN_ELEMENTS.contains(&el.name()))
        });
        if hidden {
            continue;
        }

        if !first {
            joined.push('\n');
        }
        joined.push_str(text);
        first = false;
    }

    collapse_blank_lines(&joined)
}

fn collapse_blank_lines(text: &str) -> String {
    BLANK_RUNS.replace_all(text, "\n\n").trim().to_string()
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_script_and_style_content() {
        let html = r#"
            <html>
              <head>
                <title>Acme</title>
                <style>body { color: red; }</style>
                <script>var secret = "tracking";</script>
              </head>
              <body>
                <h1>Contact us</h1>
                <script type="text/javascript">console.log("hidden")</script>
                <p>hello@acme.test</p>
                <noscript>Enable JavaScript</noscript>
              </body>
            </html>
        "#;

        let text = html_to_text(html);

        assert!(text.contains("Contact us"));
        assert!(text.contains("hello@acme.test"));
        assert!(!text.contains("color: red"));
        assert!(!text.contains("tracking"));
        assert!(!text.contains("console.log"));
        assert!(!text.contains("Enable JavaScript"));
    }

    #[test]
    fn never_leaves_more_than_one_blank_line() {
        let html = "<div>a</div>\n\n\n\n<div>   </div>\n \n\t\n<p>b</p><br><br><br><p>c</p>";
        let text = html_to_text(html);

        assert!(!text.contains("\n\n\n"));
        for window in text.split('\n').collect::<Vec<_>>().windows(3) {
            assert!(
                !window.iter().all(|line| line.trim().is_empty()),
                "found consecutive blank lines in {:?}",
                text
            );
        }
        assert!(text.starts_with('a'));
        assert!(text.ends_with('c'));
    }

    #[test]
    fn output_is_trimmed() {
        assert_eq!(html_to_text("  <p>  hi  </p>  "), "hi");
    }

    #[test]
    fn tolerates_garbage_input() {
        assert_eq!(html_to_text(""), "");
        let text = html_to_text("<<<div>>> not <really <html & stuff");
        assert!(text.contains("not"));
        assert_eq!(html_to_text("plain text only"), "plain text only");
    }

    #[test]
    fn counts_words() {
        assert_eq!(word_count("one two\n\nthree"), 3);
        assert_eq!(word_count(""), 0);
    }
}
