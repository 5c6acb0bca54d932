use super::{Directive, StepContext};
use crate::evidence::EvidenceItem;
use crate::model::Prompt;

/// Per-item cap inside the prompt; the store keeps the full text.
const EVIDENCE_PROMPT_CHARS: usize = 1200;

const SYSTEM: &str = r#"You are a research assistant running a multi-step web search.

Rules (non-negotiable):
1) Use ONLY the evidence listed in the prompt and the memory notes. Do not invent facts.
2) Cite evidence inline with its bracketed number, e.g. [1]. Cite only numbers that appear in the evidence list.
3) If the evidence is not enough to answer, ask for one more focused web search instead of guessing.

Output:
- Reply with exactly one JSON object and nothing else.
- To search: {"action":"search","query":"<new focused query>"}
- To answer: {"action":"answer","answer":"<answer with inline [n] citations>","citations":[<numbers cited>]}
"#;

pub fn step_prompt(ctx: &StepContext) -> Prompt {
    let mut user = String::new();

    if let Some((root, rest)) = ctx.query_chain.split_first() {
        user.push_str(&format!("Question:\n{root}\n"));
        if !rest.is_empty() {
            user.push_str("\nSearches already made:\n");
            for q in rest {
                user.push_str(&format!("- {q}\n"));
            }
        }
    }

    if !ctx.memory_excerpt.trim().is_empty() {
        user.push_str(&format!("\nMemory notes:\n{}\n", ctx.memory_excerpt.trim()));
    }

    user.push_str("\nEvidence:\n");
    if ctx.evidence.is_empty() {
        user.push_str("(no evidence was retrieved)\n");
    } else {
        user.push_str(&evidence_blocks(&ctx.evidence));
    }

    match &ctx.directive {
        Some(Directive::MustAnswer(reason)) => user.push_str(&format!(
            "\nThe search budget is exhausted ({reason}). You MUST reply with an answer action now. \
             If the evidence is insufficient, say so plainly in the answer.\n"
        )),
        None => user.push_str("\nDecide: answer now, or request one more search.\n"),
    }

    Prompt {
        system: SYSTEM.to_string(),
        user,
    }
}

/// The original prompt plus the reason the previous reply was rejected.
pub fn corrective_prompt(base: &Prompt, rejected: &str, problem: &str) -> Prompt {
    let excerpt: String = rejected.chars().take(400).collect();
    Prompt {
        system: base.system.clone(),
        user: format!(
            "{}\nYour previous reply was rejected.\nReply:\n{excerpt}\nProblem: {problem}\n\
             Reply again with one valid JSON object, citing only numbers from the evidence list.\n",
            base.user
        ),
    }
}

fn evidence_blocks(items: &[EvidenceItem]) -> String {
    items
        .iter()
        .map(|item| {
            let title = item.title.as_deref().unwrap_or(&item.source_id);
            let text: String = item.text.chars().take(EVIDENCE_PROMPT_CHARS).collect();
            format!("{} {title} ({})\n{text}\n", item.handle, item.source_id)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
