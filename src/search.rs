//! `kbchat search` and `kbchat ask`.
//!
//! Both go through the same [`QueryPipeline`](crate::answer::QueryPipeline)
//! as `POST /search` and `POST /chat`; this module only renders results.

use anyhow::Result;

use kbchat_core::search::similarity_percent;

use crate::app::App;

const EXCERPT_CHARS: usize = 200;

pub async fn run_search(app: &App, query: &str, limit: Option<usize>) -> Result<()> {
    let matches = app.query.search(query, limit).await?;

    if matches.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, m) in matches.iter().enumerate() {
        let title = m.metadata.title.as_deref().unwrap_or(&m.metadata.filename);
        println!(
            "{}. [{:.0}%] {} (chunk {})",
            i + 1,
            similarity_percent(m.score),
            title,
            m.sequence_index
        );
        println!("    file: {}", m.metadata.filename);
        if let Some(ref category) = m.metadata.category {
            println!("    category: {}", category);
        }
        println!("    excerpt: \"{}\"", excerpt(&m.text));
        println!("    document: {}", m.document_id);
        println!();
    }
    Ok(())
}

pub async fn run_ask(app: &App, question: &str, top_k: Option<usize>) -> Result<()> {
    let answer = app.query.answer(question, top_k, &[]).await?;

    println!("{}", answer.answer);
    println!();
    println!("Sources:");
    for c in &answer.citations {
        let title = c.title.as_deref().unwrap_or(&c.filename);
        println!("  [{}] {} ({:.0}%), {}", c.index, title, c.similarity, c.filename);
    }
    if answer.context_truncated {
        println!();
        println!("(context was truncated to fit the prompt budget)");
    }
    Ok(())
}

fn excerpt(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= EXCERPT_CHARS {
        return flat;
    }
    let cut: String = flat.chars().take(EXCERPT_CHARS).collect();
    format!("{}…", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_flattens_whitespace() {
        assert_eq!(excerpt("Wave\n  picking\tgroups orders"), "Wave picking groups orders");
    }

    #[test]
    fn test_excerpt_truncates_long_text() {
        let long = "word ".repeat(100);
        let e = excerpt(&long);
        assert!(e.ends_with('…'));
        assert!(e.chars().count() <= EXCERPT_CHARS + 1);
    }
}
