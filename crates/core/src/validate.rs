//! Cross-reference validation over a parsed document.
//!
//! Checks are name-level: steps reference defined agents and workflows,
//! teams reference existing peers, `extends` chains resolve without
//! cycles, and every agent ends up with a model and a system prompt.

use std::collections::BTreeSet;

use crate::document::Document;
use crate::error::{Diagnostic, Error, Result};
use crate::step::Step;

/// Reserved meta-agent name; user documents may not define it.
pub const MOTHER: &str = "mother";

/// Validate a parsed document. Returns all diagnostics at once.
pub fn validate(doc: &Document) -> Result<()> {
    let mut diags = Vec::new();

    if doc.agents.is_empty() {
        diags.push(Diagnostic::new("agents", "document defines no agents"));
    }

    let agent_names: Vec<&str> = doc.agents.keys().map(String::as_str).collect();

    for (name, agent) in &doc.agents {
        let field = format!("agents.{name}");

        if name == MOTHER {
            diags.push(Diagnostic::new(&field, "'mother' is a reserved agent name"));
        }

        if let Some(parent) = &agent.extends {
            if !doc.agents.contains_key(parent) {
                let mut d = Diagnostic::new(
                    format!("{field}.extends"),
                    format!("unknown parent agent '{parent}'"),
                );
                if let Some(hint) = suggest(parent, &agent_names) {
                    d = d.hint(format!("did you mean '{hint}'?"));
                }
                diags.push(d);
            } else if has_extends_cycle(doc, name) {
                diags.push(Diagnostic::new(
                    format!("{field}.extends"),
                    "extends chain forms a cycle",
                ));
            }
        }

        for peer in &agent.team {
            if peer == name {
                diags.push(Diagnostic::new(
                    format!("{field}.team"),
                    "agent cannot be a member of its own team",
                ));
            } else if !doc.agents.contains_key(peer) {
                let mut d = Diagnostic::new(
                    format!("{field}.team"),
                    format!("unknown team member '{peer}'"),
                );
                if let Some(hint) = suggest(peer, &agent_names) {
                    d = d.hint(format!("did you mean '{hint}'?"));
                }
                diags.push(d);
            }
        }

        // Resolve extends before checking required fields so inherited
        // values count. Skip if the chain is broken; that was reported.
        let resolved = doc
            .resolved_agent(name)
            .map(|a| doc.with_defaults(a))
            .unwrap_or_else(|| doc.with_defaults(agent.clone()));

        if resolved.model.is_empty() {
            diags.push(Diagnostic::new(
                format!("{field}.model"),
                "no model set and settings declare no default",
            ));
        }
        if resolved.system.is_empty() {
            diags.push(Diagnostic::new(
                format!("{field}.system"),
                "system prompt is required",
            ));
        }
    }

    for (wf_name, workflow) in &doc.workflows {
        let workflow_names: Vec<&str> = doc.workflows.keys().map(String::as_str).collect();
        for (i, step) in workflow.steps.iter().enumerate() {
            let field = format!("workflows.{wf_name}.steps[{i}]");
            step.walk(&mut |s| match s {
                Step::Call(call) => {
                    if !doc.agents.contains_key(&call.agent) {
                        let mut d = Diagnostic::new(
                            field.clone(),
                            format!("undefined agent '{}'", call.agent),
                        );
                        if let Some(hint) = suggest(&call.agent, &agent_names) {
                            d = d.hint(format!("did you mean '{hint}'?"));
                        }
                        diags.push(d);
                    }
                }
                Step::Workflow(sub) => {
                    if !doc.workflows.contains_key(&sub.workflow) {
                        let mut d = Diagnostic::new(
                            field.clone(),
                            format!("undefined workflow '{}'", sub.workflow),
                        );
                        if let Some(hint) = suggest(&sub.workflow, &workflow_names) {
                            d = d.hint(format!("did you mean '{hint}'?"));
                        }
                        diags.push(d);
                    }
                }
                _ => {}
            });
        }
    }

    if diags.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(diags))
    }
}

fn has_extends_cycle(doc: &Document, start: &str) -> bool {
    let mut seen = BTreeSet::new();
    let mut current = start;
    loop {
        if !seen.insert(current) {
            return true;
        }
        match doc.agents.get(current).and_then(|a| a.extends.as_deref()) {
            Some(parent) if doc.agents.contains_key(parent) => current = parent,
            _ => return false,
        }
    }
}

/// Pick the closest known name for a typo, if any plausibly matches.
///
/// Scoring is deliberately simple: shared lowercase prefix length, plus
/// a containment bonus either way. A score below 2 is no suggestion.
pub fn suggest<'a>(input: &str, candidates: &[&'a str]) -> Option<&'a str> {
    let needle = input.to_lowercase();
    let mut best: Option<(&str, usize)> = None;
    for candidate in candidates {
        let hay = candidate.to_lowercase();
        if hay == needle {
            continue;
        }
        let prefix = needle
            .chars()
            .zip(hay.chars())
            .take_while(|(a, b)| a == b)
            .count();
        let containment = if hay.contains(&needle) || needle.contains(&hay) {
            2
        } else {
            0
        };
        let score = prefix + containment;
        if score >= 2 && best.is_none_or(|(_, s)| score > s) {
            best = Some((candidate, score));
        }
    }
    best.map(|(name, _)| name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentDef;
    use crate::step::{CallStep, WorkflowDef};

    fn doc_with_agent(agent: AgentDef) -> Document {
        let mut doc = Document::default();
        doc.agents.insert(agent.name.clone(), agent);
        doc
    }

    fn valid_agent(name: &str) -> AgentDef {
        AgentDef::new(name).model("m").system("You help.")
    }

    #[test]
    fn empty_document_rejected() {
        let err = validate(&Document::default()).unwrap_err();
        assert!(err.to_string().contains("no agents"));
    }

    #[test]
    fn missing_model_without_default_rejected() {
        let doc = doc_with_agent(AgentDef::new("a").system("hi"));
        let err = validate(&doc).unwrap_err();
        assert!(err.to_string().contains("no model"));
    }

    #[test]
    fn settings_default_model_accepted() {
        let mut doc = doc_with_agent(AgentDef::new("a").system("hi"));
        doc.settings.model = Some("m-default".into());
        validate(&doc).unwrap();
    }

    #[test]
    fn self_team_rejected() {
        let doc = doc_with_agent(valid_agent("a").peer("a"));
        let err = validate(&doc).unwrap_err();
        assert!(err.to_string().contains("own team"));
    }

    #[test]
    fn unknown_team_member_suggested() {
        let mut doc = doc_with_agent(valid_agent("dan").peer("anne"));
        doc.agents.insert("ann".into(), valid_agent("ann"));
        let err = validate(&doc).unwrap_err();
        assert!(err.to_string().contains("did you mean 'ann'?"), "{err}");
    }

    #[test]
    fn extends_cycle_rejected() {
        let mut a = valid_agent("a");
        a.extends = Some("b".into());
        let mut b = valid_agent("b");
        b.extends = Some("a".into());
        let mut doc = doc_with_agent(a);
        doc.agents.insert("b".into(), b);
        let err = validate(&doc).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn undefined_step_agent_rejected_with_hint() {
        let mut doc = doc_with_agent(valid_agent("researcher"));
        doc.workflows.insert(
            "w".into(),
            WorkflowDef {
                name: "w".into(),
                steps: vec![Step::Call(CallStep {
                    agent: "resercher".into(),
                    send: "go".into(),
                    ..Default::default()
                })],
                ..Default::default()
            },
        );
        let err = validate(&doc).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("undefined agent 'resercher'"));
        assert!(text.contains("did you mean 'researcher'?"));
    }

    #[test]
    fn undefined_sub_workflow_rejected() {
        let mut doc = doc_with_agent(valid_agent("a"));
        doc.workflows.insert(
            "w".into(),
            WorkflowDef {
                name: "w".into(),
                steps: vec![Step::Workflow(crate::step::SubWorkflowStep {
                    workflow: "missing".into(),
                    ..Default::default()
                })],
                ..Default::default()
            },
        );
        assert!(validate(&doc).is_err());
    }

    #[test]
    fn mother_reserved() {
        let doc = doc_with_agent(valid_agent(MOTHER));
        let err = validate(&doc).unwrap_err();
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn suggest_prefers_prefix_and_containment() {
        assert_eq!(suggest("resercher", &["researcher", "writer"]), Some("researcher"));
        assert_eq!(suggest("ann", &["anna", "bob"]), Some("anna"));
        assert_eq!(suggest("zzz", &["researcher", "writer"]), None);
    }
}
