use syntect::{
    html::{ClassStyle, ClassedHTMLGenerator},
    parsing::{SyntaxReference, SyntaxSet},
    util::LinesWithEndings,
};

use crate::application::render::types::RenderError;

pub(crate) fn highlight_code(
    language: Option<&str>,
    code: &str,
    syntax_set: &SyntaxSet,
    class_style: &ClassStyle,
) -> Result<String, RenderError> {
    let lang_token = language
        .map(|token| token.to_ascii_lowercase())
        .filter(|token| is_safe_token(token))
        .unwrap_or_else(|| "text".to_string());
    let syntax =
        find_syntax(syntax_set, &lang_token).unwrap_or_else(|| syntax_set.find_syntax_plain_text());

    let mut code_with_newline = code.to_string();
    if !code_with_newline.ends_with('\n') {
        code_with_newline.push('\n');
    }

    let mut generator =
        ClassedHTMLGenerator::new_with_class_style(syntax, syntax_set, *class_style);

    for line in LinesWithEndings::from(code_with_newline.as_str()) {
        generator
            .parse_html_for_line_which_includes_newline(line)
            .map_err(|err| RenderError::Highlighting {
                language: lang_token.clone(),
                message: err.to_string(),
            })?;
    }

    let highlighted = generator.finalize();
    Ok(format!(
        "<pre class=\"syntax-highlight syntax-lang-{lang_token}\" data-language=\"{lang_token}\"><code class=\"language-{lang_token} syntax-code\">{highlighted}</code></pre>"
    ))
}

// Info strings land inside attribute values; anything beyond this set falls back to plain text.
fn is_safe_token(token: &str) -> bool {
    !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '+' | '#' | '.'))
}

fn find_syntax<'a>(syntax_set: &'a SyntaxSet, token: &str) -> Option<&'a SyntaxReference> {
    syntax_set
        .find_syntax_by_token(token)
        .or_else(|| syntax_set.find_syntax_by_name(token))
        .or_else(|| syntax_set.find_syntax_by_extension(token))
}
