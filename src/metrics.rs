use std::io::Read as _;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::cli::MetricsArgs;

/// Node of a structured document body (`{"type": .., "text": .., "content": [..]}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocNode {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<DocNode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyForm<'a> {
    Plain(&'a str),
    Structured(DocNode),
}

impl<'a> BodyForm<'a> {
    /// Bodies that parse as a JSON document node are structured; anything else is plain text.
    pub fn detect(raw: &'a str) -> Self {
        if raw.trim_start().starts_with('{')
            && let Ok(node) = serde_json::from_str::<DocNode>(raw)
        {
            return Self::Structured(node);
        }
        Self::Plain(raw)
    }

    pub fn plain_text(&self) -> String {
        match self {
            Self::Plain(text) => (*text).to_string(),
            Self::Structured(node) => extract_text(node),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMetrics {
    pub words: usize,
    pub characters: usize,
}

pub fn derive(raw: &str) -> TextMetrics {
    let text = BodyForm::detect(raw).plain_text();
    TextMetrics {
        words: count_words(&text),
        characters: text.chars().count(),
    }
}

pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Depth-first: a node yields its own text, otherwise its children's text concatenated.
pub fn extract_text(node: &DocNode) -> String {
    let mut out = String::new();
    push_text(node, &mut out);
    out
}

fn push_text(node: &DocNode, out: &mut String) {
    if let Some(text) = &node.text {
        out.push_str(text);
        return;
    }
    for child in &node.content {
        push_text(child, out);
    }
}

pub fn run(args: MetricsArgs) -> anyhow::Result<()> {
    let raw = match &args.file {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("read {path}"))?,
        None => {
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .context("read stdin")?;
            raw
        }
    };
    let metrics = derive(&raw);
    tracing::debug!(words = metrics.words, characters = metrics.characters, "derived metrics");
    println!(
        "{}",
        serde_json::to_string(&metrics).context("serialize metrics")?
    );
    Ok(())
}
