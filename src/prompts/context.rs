use std::collections::BTreeMap;
use std::fmt::Write;

/// Snapshot of file contents, keyed by path.
pub(crate) type FileContext = BTreeMap<String, String>;

/// Append the project manifest and the selected files to `prompt`.
///
/// The manifest lists every path in `file_paths`. The context buffer that
/// follows holds the content of each file in `context_files`. Without
/// context files the prompt is returned as is.
pub(crate) fn with_context(prompt: &str, file_paths: &[String], context_files: &FileContext) -> String {
    if context_files.is_empty() {
        return prompt.to_string();
    }

    let mut out = String::from(prompt);

    out.push_str("\n\nBelow is the list of every file in the project:\n<project_files>\n");
    for path in file_paths {
        let _ = writeln!(out, "- {}", path);
    }
    out.push_str("</project_files>\n");

    out.push_str(
        "\nBelow is the content of the files selected as context for this request. \
         They are the latest versions; use them over anything earlier in the conversation.\n\
         <context_buffer>\n",
    );

    for (path, content) in context_files {
        let _ = write!(out, "---\nFile: {}\n```\n{}", path, content);
        if !content.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("```\n");
    }

    out.push_str("---\n</context_buffer>\n");

    out
}

/// Append the running summary of the conversation to `prompt`.
pub(crate) fn with_summary(prompt: &str, summary: &str) -> String {
    let summary = summary.trim();

    if summary.is_empty() {
        return prompt.to_string();
    }

    format!(
        "{}\n\nBelow is a summary of the conversation so far. Earlier messages have been \
         replaced by it:\n<chat_summary>\n{}\n</chat_summary>\n",
        prompt, summary
    )
}
