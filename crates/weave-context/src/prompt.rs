//! Prompt Assembler (§4.7): renders the final system prompt from the
//! agent's instructions plus RAG/memory context and turn metadata.

use weave_providers::ToolDefinition;

/// Everything the assembler needs for a single turn. Borrowed rather than
/// owned since callers already hold these pieces from C4/C6/conversation
/// state.
pub struct PromptInputs<'a> {
    pub agent_instructions: &'a str,
    pub rag_context: Option<&'a str>,
    pub memory_recall: Option<&'a str>,
    pub tools: &'a [ToolDefinition],
    pub turn: u32,
    pub max_turns: u32,
}

/// Concatenates, separated by blank lines: agent instructions, optional RAG
/// context, optional memory recall, a tool-availability preamble, and the
/// current turn metadata (§4.7). The first-turn result is the caller's
/// responsibility to snapshot onto the conversation for audit.
pub fn assemble_system_prompt(inputs: &PromptInputs) -> String {
    let mut sections: Vec<String> = vec![inputs.agent_instructions.to_string()];

    if let Some(rag) = inputs.rag_context {
        if !rag.trim().is_empty() {
            sections.push(rag.to_string());
        }
    }

    if let Some(recall) = inputs.memory_recall {
        if !recall.trim().is_empty() {
            sections.push(recall.to_string());
        }
    }

    if !inputs.tools.is_empty() {
        sections.push(tool_preamble(inputs.tools));
    }

    sections.push(format!("Turn: {}/{}", inputs.turn, inputs.max_turns));

    sections.join("\n\n")
}

fn tool_preamble(tools: &[ToolDefinition]) -> String {
    let mut out = String::from("Available tools:");
    for tool in tools {
        out.push('\n');
        out.push_str("- ");
        out.push_str(&tool.name);
        out.push_str(": ");
        out.push_str(&tool.description);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str, desc: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.into(),
            description: desc.into(),
            input_schema: serde_json::json!({}),
        }
    }

    #[test]
    fn omits_absent_sections() {
        let inputs = PromptInputs {
            agent_instructions: "Be helpful.",
            rag_context: None,
            memory_recall: None,
            tools: &[],
            turn: 1,
            max_turns: 25,
        };
        let prompt = assemble_system_prompt(&inputs);
        assert_eq!(prompt, "Be helpful.\n\nTurn: 1/25");
    }

    #[test]
    fn includes_all_sections_in_order() {
        let tools = vec![tool("todo_add", "Add a todo item")];
        let inputs = PromptInputs {
            agent_instructions: "Be helpful.",
            rag_context: Some("[Source 1] Doc (Chunk 0)\nbody\n---"),
            memory_recall: Some("User prefers concise answers."),
            tools: &tools,
            turn: 3,
            max_turns: 25,
        };
        let prompt = assemble_system_prompt(&inputs);
        let instructions_pos = prompt.find("Be helpful.").unwrap();
        let rag_pos = prompt.find("[Source 1]").unwrap();
        let recall_pos = prompt.find("User prefers").unwrap();
        let tools_pos = prompt.find("Available tools:").unwrap();
        let turn_pos = prompt.find("Turn: 3/25").unwrap();
        assert!(instructions_pos < rag_pos);
        assert!(rag_pos < recall_pos);
        assert!(recall_pos < tools_pos);
        assert!(tools_pos < turn_pos);
    }
}
