use troupe_core::{AgentSpec, MessageKind, RoleId};

/// The default seven-role team: research and planning on `opus`, delivery on `sonnet`.
pub fn default_team() -> Vec<AgentSpec> {
    vec![
        AgentSpec::new("researcher", "opus").with_completion_signal("RESEARCH_COMPLETE"),
        AgentSpec::new("manager", "opus")
            .with_dependencies(["researcher"])
            .with_completion_signal("TASKS_CREATED"),
        AgentSpec::new("product_manager", "opus").with_completion_signal("REQUIREMENTS_COMPLETE"),
        AgentSpec::new("architect", "opus")
            .with_dependencies(["manager"])
            .with_completion_signal("ARCHITECTURE_COMPLETE"),
        AgentSpec::new("developer", "sonnet")
            .with_dependencies(["architect"])
            .with_completion_signal("IMPLEMENTATION_COMPLETE"),
        AgentSpec::new("tester", "sonnet")
            .with_dependencies(["developer"])
            .with_completion_signal("TESTING_COMPLETE"),
        AgentSpec::new("reviewer", "sonnet")
            .with_dependencies(["tester"])
            .with_completion_signal("REVIEW_COMPLETE"),
    ]
}

/// Completion word for `spec`: its own, the role default, or `<ROLE>_COMPLETE`.
pub fn completion_signal(spec: &AgentSpec) -> String {
    if let Some(signal) = &spec.completion_signal {
        return signal.clone();
    }
    default_team()
        .into_iter()
        .find(|d| d.role == spec.role)
        .and_then(|d| d.completion_signal)
        .unwrap_or_else(|| format!("{}_COMPLETE", spec.role.as_str().to_ascii_uppercase()))
}

/// Fill in a completion signal for every spec that lacks one.
pub fn with_resolved_signals(specs: &[AgentSpec]) -> Vec<AgentSpec> {
    specs
        .iter()
        .map(|spec| {
            let mut spec = spec.clone();
            spec.completion_signal = Some(completion_signal(&spec));
            spec
        })
        .collect()
}

/// The full prompt sent to a worker.
///
/// The role text (custom or default) is followed by the completion and
/// messaging instructions, which are always present. The result is a single
/// line so that no instruction can be mistaken for a marker when the worker's
/// terminal echoes it back.
pub fn build_prompt(spec: &AgentSpec) -> String {
    let role_text = spec
        .custom_prompt
        .clone()
        .unwrap_or_else(|| default_prompt(&spec.role));
    let tags = MessageKind::ALL
        .iter()
        .map(|k| format!("[{}]", k.tag()))
        .collect::<Vec<_>>()
        .join(", ");
    let sections = [
        role_text,
        format!(
            "To talk to the other agents, print a line that starts with one of the tags {tags}, \
             optionally followed by @role to address one agent (everyone gets it otherwise), \
             then your message. Add fields such as '| Severity: high' or '| File: src/main.rs:42' when useful."
        ),
        format!(
            "When your work is complete, print <promise>{}</promise> on a line by itself and nothing else on that line.",
            completion_signal(spec)
        ),
    ];
    sections
        .iter()
        .flat_map(|s| s.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}

fn default_prompt(role: &RoleId) -> String {
    let text = match role.as_str() {
        "researcher" => {
            "You are the Researcher. Investigate the problem domain, existing code and \
             relevant libraries. Share every important discovery with the team as a finding."
        }
        "manager" => {
            "You are the Manager. Turn the research into a prioritized task list with clear \
             owners and acceptance criteria, and keep the team coordinated."
        }
        "product_manager" => {
            "You are the Product Manager. Write the user-facing requirements and acceptance \
             criteria, and answer questions about scope."
        }
        "architect" => {
            "You are the Architect. Design the module structure, interfaces and data flow for \
             the planned tasks and document the decisions the developer needs."
        }
        "developer" => {
            "You are the Developer. Implement the architecture task by task, keeping the build \
             green, and claim each task before starting it."
        }
        "tester" => {
            "You are the Tester. Write and run tests for the implementation, and report every \
             defect to the developer with the file and line involved."
        }
        "reviewer" => {
            "You are the Reviewer. Review the finished code for correctness, security and \
             maintainability, and raise findings with a severity."
        }
        _ => return format!("You are the {} agent. Complete your part of the project.", role.display_name()),
    };
    text.to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::scheduler::DependencyScheduler;

    #[test]
    fn test_default_team_is_a_valid_dag() {
        let team = default_team();
        assert_eq!(team.len(), 7);
        let scheduler = DependencyScheduler::new(&team).unwrap();
        let order: Vec<_> = scheduler
            .execution_order()
            .into_iter()
            .map(|r| r.to_string())
            .collect();
        assert_eq!(
            order,
            vec![
                "researcher",
                "manager",
                "product_manager",
                "architect",
                "developer",
                "tester",
                "reviewer"
            ]
        );
    }

    #[test]
    fn test_completion_signal_fallbacks() {
        assert_eq!(
            completion_signal(&AgentSpec::new("tester", "sonnet")),
            "TESTING_COMPLETE"
        );
        assert_eq!(
            completion_signal(&AgentSpec::new("data_engineer", "sonnet")),
            "DATA_ENGINEER_COMPLETE"
        );
        let custom = AgentSpec::new("tester", "sonnet").with_completion_signal("QA_DONE");
        assert_eq!(completion_signal(&custom), "QA_DONE");
    }

    #[test]
    fn test_prompt_is_single_line_with_instructions() {
        let spec = AgentSpec::new("developer", "sonnet");
        let prompt = build_prompt(&spec);
        assert!(!prompt.contains('\n'));
        assert!(prompt.starts_with("You are the Developer."));
        assert!(prompt.contains("<promise>IMPLEMENTATION_COMPLETE</promise>"));
        assert!(prompt.contains("[FINDING]"));
        assert!(prompt.contains("[COORD]"));
    }

    #[test]
    fn test_custom_prompt_keeps_instructions() {
        let spec = AgentSpec::new("designer", "sonnet")
            .with_prompt("Design the logo.\nUse two colors.");
        let prompt = build_prompt(&spec);
        assert!(prompt.starts_with("Design the logo. Use two colors."));
        assert!(prompt.contains("<promise>DESIGNER_COMPLETE</promise>"));
    }

    #[test]
    fn test_echoed_prompt_does_not_complete() {
        use crate::classifier::OutputClassifier;
        use troupe_core::OutputState;

        let spec = AgentSpec::new("architect", "opus");
        let echoed = format!("$ claude --model opus '{}'", build_prompt(&spec));
        let classifier =
            OutputClassifier::with_defaults(Some("ARCHITECTURE_COMPLETE"), 50).unwrap();
        assert_ne!(classifier.classify(&echoed), OutputState::Done);
    }
}
