//! Prompt rendering.
//!
//! Templates are filled by literal token replacement. They routinely contain
//! JSON examples, so `{` and `}` outside the two known tokens are left alone.

pub const URL_TOKEN: &str = "{url}";
pub const CONTENT_TOKEN: &str = "{content}";

/// Compact per-chunk template used during map-reduce summarization.
pub const CHUNK_PROMPT_TEMPLATE: &str = r#"你将收到一个内容片段。请基于片段生成中文 JSON：
{
  "brief": "片段简介（50字以内）",
  "summary": "片段要点（300字以内）"
}

URL: {url}
片段内容:
{content}"#;

const CONTENT_FRAMING: &str =
    "下面是你可直接使用的内容材料，请优先基于这些材料总结，不要回答“无法访问链接”：";

/// Render `template` for `url`. Content goes into `{content}` when the
/// template has that token, otherwise it is appended after a framing line.
pub fn render_prompt(template: &str, url: &str, content: Option<&str>) -> String {
    let prompt = template.replace(URL_TOKEN, url);
    if prompt.contains(CONTENT_TOKEN) {
        return prompt.replace(CONTENT_TOKEN, content.unwrap_or_default());
    }

    match content {
        Some(content) if !content.is_empty() => {
            format!("{}\n\n{}\n{}", prompt, CONTENT_FRAMING, content)
        }
        _ => prompt,
    }
}
