use comrak::nodes::{AstNode, NodeHtmlBlock, NodeValue};
use syntect::html::ClassStyle;
use syntect::parsing::SyntaxSet;

use crate::application::render::types::RenderError;

use super::highlight;

/// Replace fenced and indented code blocks with pre-highlighted HTML blocks.
///
/// Returns the number of blocks rewritten.
pub(crate) fn highlight_code_blocks<'a>(
    root: &'a AstNode<'a>,
    syntax_set: &SyntaxSet,
    class_style: &ClassStyle,
) -> Result<usize, RenderError> {
    let mut rewritten = 0;
    visit(root, syntax_set, class_style, &mut rewritten)?;
    Ok(rewritten)
}

fn visit<'a>(
    node: &'a AstNode<'a>,
    syntax_set: &SyntaxSet,
    class_style: &ClassStyle,
    rewritten: &mut usize,
) -> Result<(), RenderError> {
    if let Some((info, literal)) = extract_code_block(node) {
        let language = info.split_whitespace().next();
        let html = highlight::highlight_code(language, &literal, syntax_set, class_style)?;
        let mut data = node.data.borrow_mut();
        data.value = NodeValue::HtmlBlock(NodeHtmlBlock {
            block_type: 0,
            literal: html,
        });
        *rewritten += 1;
        return Ok(());
    }

    let mut child = node.first_child();
    while let Some(next) = child {
        visit(next, syntax_set, class_style, rewritten)?;
        child = next.next_sibling();
    }

    Ok(())
}

fn extract_code_block(node: &AstNode<'_>) -> Option<(String, String)> {
    let data = node.data.borrow();
    if let NodeValue::CodeBlock(block) = &data.value {
        Some((block.info.trim().to_string(), block.literal.clone()))
    } else {
        None
    }
}
