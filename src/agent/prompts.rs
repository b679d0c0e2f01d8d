//! Fixed instruction texts used by the agents

use serde_json::{json, Value};

// ─────────────────────────────────────────────────────────────────────────────
// Code-Fix Agent
// ─────────────────────────────────────────────────────────────────────────────

/// Substrings that make a fenced block worth running.
pub const RUNNABLE_MARKERS: &[&str] = &["plt.", "fig", "matplotlib", "pd.", "print(", "dataframe"];

pub fn fix_request(stdout_text: &str) -> String {
    format!(
        "Code Execution Failed with Error:\n{stdout_text}\n\n\
         Please fix the code and output the corrected Python code block."
    )
}

pub fn execution_report(stdout_text: &str) -> String {
    format!("Running Code...\n\n```text\n{stdout_text}\n```")
}

pub fn execution_failure_report(stdout_text: &str) -> String {
    format!("❌ Execution Failed (Retry limit reached):\n\n```text\n{stdout_text}\n```")
}

// ─────────────────────────────────────────────────────────────────────────────
// Deep-Research Agent
// ─────────────────────────────────────────────────────────────────────────────

pub const NO_FINDINGS_YET: &str = "(No research findings yet.)";
pub const NO_FINDINGS: &str = "(No additional research findings.)";

pub fn research_evaluation(current_knowledge: &str) -> String {
    format!(
        "You are an expert researcher gathering information to give a fully \
         supported answer to the user's latest request.\n\
         The research so far has produced the following findings:\n\
         -----------------\n\
         {current_knowledge}\n\
         -----------------\n\
         [Your task]\n\
         Based on these findings, decide whether the information is sufficient to \
         answer the user's request completely.\n\
         If information is missing, the factual support is weak, or a new question \
         worth digging into has come up, propose 1 to 3 Google search queries that \
         would resolve it.\n\
         If the information is sufficient, set status to 'sufficient' and leave \
         next_queries empty.\n"
    )
}

pub fn research_evaluation_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "status": {
                "type": "string",
                "enum": ["needs_more_info", "sufficient"],
                "description": "'needs_more_info' or 'sufficient'"
            },
            "next_queries": {"type": "array", "items": {"type": "string"}},
            "reasoning": {
                "type": "string",
                "description": "Current situation and why these searches are next"
            }
        },
        "required": ["status", "next_queries", "reasoning"]
    })
}

pub fn research_search(query: &str) -> String {
    format!(
        "Run a Google search for the query below and list the important facts, \
         figures and viewpoints you find, summarized in detail.\nQuery: {query}"
    )
}

pub fn research_finding(query: &str, text: &str) -> String {
    format!("[Search query: {query} findings]\n{text}")
}

pub fn research_synthesis(system_instruction: &str, compiled_findings: &str) -> String {
    format!(
        "{system_instruction}\n\n=================================\n\
         [Strict instruction: treat only the research findings below as ground truth \
         and answer the user's question comprehensively and logically.]\n\
         [Reasoning rules]\n\
         - Weigh official documentation, public institutions and reliable primary \
         sources first.\n\
         - When sources contradict each other, do not force one of them to be right: \
         present both sides, infer the background and assumptions behind each, and \
         compare them logically.\n\
         - Ignore findings that are irrelevant to the user's request and make the \
         line of reasoning to the conclusion explicit.\n\n\
         [Research findings]\n\
         {compiled_findings}\n\
         =================================\n"
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Deep-Reasoning Agent
// ─────────────────────────────────────────────────────────────────────────────

pub const BRAINSTORM: &str = "You are an AI system with world-class logical reasoning ability.\n\
To solve the user's latest request, devise 3 different approaches (solutions, \
designs, or viewpoints).\n\
For example, generate approaches from several angles, such as one that favors \
efficiency and simplicity, one that favors completeness and robustness, and one \
that questions the premises themselves.";

pub fn brainstorm_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "approaches": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string", "description": "Short name of the approach"},
                        "description": {"type": "string", "description": "Outline and aim of the approach"}
                    },
                    "required": ["name", "description"]
                }
            }
        },
        "required": ["approaches"]
    })
}

pub const FALLBACK_APPROACH_NAME: &str = "Logical approach";
pub const FALLBACK_APPROACH_DESCRIPTION: &str =
    "A standard logical approach that solves the problem within the given constraints";

pub fn critique(name: &str, description: &str) -> String {
    format!(
        "The following approach is being considered as a solution to the user's request.\n\
         [Approach name]: {name}\n\
         [Outline]: {description}\n\n\
         Reason through this approach in depth and make it concrete, then deliberately \
         **critique it harshly** (potential risks, logical leaps, failures on edge cases).\n\
         Write the two parts as clearly separated sections: \"Concrete reasoning\" and \
         \"Self-critique and weaknesses\"."
    )
}

pub fn critique_block(name: &str, text: &str) -> String {
    format!("[Approach: {name} - elaboration and self-critique]\n{text}")
}

pub fn reasoning_integration(system_instruction: &str, compiled_critiques: &str) -> String {
    format!(
        "{system_instruction}\n\n=================================\n\
         [Strict instruction: build on the record of approaches and self-critiques \
         below to produce the final, most refined answer to the user's question.]\n\
         [Reasoning rules]\n\
         - Either merge the strengths of all approaches or choose the approach that \
         best survives its critique.\n\
         - Format the final answer in whatever form best fits the user's request \
         (code, report, explanation, step-by-step guide, and so on).\n\
         - Briefly include the reasoning that led to the conclusion and deliver a \
         practical result the user can use as is.\n\n\
         [Record of elaborations and self-critiques]\n\
         {compiled_critiques}\n\
         =================================\n"
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Editor canvases
// ─────────────────────────────────────────────────────────────────────────────

pub const REVIEW_CANVAS_SINGLE: &str =
    "### Reference Code (Canvas)\nPlease review this code and suggest improvements.";

pub fn review_canvas(number: usize) -> String {
    format!("### Reference Code (Canvas-{number})\nPlease review this canvas and suggest improvements.")
}

pub fn canvas_validation(code: &str, report: &str) -> String {
    format!(
        "Below is a pylint report for the code that follows. Analyze it: explain \
         each issue, judge how serious it is and show the corrected code.\n\
         {report}\n\n\
         Target code:\n```python\n{code}\n```"
    )
}
