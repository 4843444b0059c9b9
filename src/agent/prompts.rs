//! Prompt templates for the three pipeline roles.
//!
//! Each role gets a fixed system prompt plus an initial message built from
//! the task record and the worktree it operates in. The prompts tell the
//! agent to simply end its turn when done: turn completion is what the
//! runtime reports as a session-idle event, and the next role (not the
//! current one) judges whether the work actually holds up.

use std::path::Path;

use crate::store::TaskRecord;

pub fn implementor_system_prompt() -> &'static str {
    "You are the implementor agent for Foreman. You work in an isolated git \
worktree dedicated to one task. Rules: (1) Only modify files within your \
working directory. (2) Commit your work in the worktree as you go. \
(3) Run the project's tests after every significant change and fix failures \
before moving on. (4) When the implementation is complete and committed, \
end your turn without further questions."
}

pub fn reviewer_system_prompt() -> &'static str {
    "You are the reviewer agent for Foreman. You review the implementation \
committed in this worktree against the task description. Rules: (1) Read \
the diff against the base revision before anything else. (2) Verify the \
change does what the task asks and that tests cover it. (3) Record your \
findings in REVIEW.md at the worktree root, fixing only trivial issues \
yourself. (4) When your review is recorded, end your turn."
}

pub fn merger_system_prompt() -> &'static str {
    "You are the merger agent for Foreman. You land the reviewed change from \
this worktree onto the repository's base branch. Rules: (1) Address any \
blocking findings in REVIEW.md before merging. (2) Merge with a clean, \
descriptive commit message referencing the task. (3) If the merge cannot \
be completed safely, say why instead of forcing it. (4) When the merge is \
done, end your turn."
}

/// Initial message for the implementor.
pub fn build_implementation_prompt(record: &TaskRecord, worktree: &Path) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!("# Task {}: {}\n\n", record.id, record.title));
    push_description(&mut prompt, record);
    prompt.push_str(&format!(
        "## Working Directory\n\n{}\n\n",
        worktree.display()
    ));
    prompt.push_str(
        "## Instructions\n\n\
         Implement the task described above in this worktree. Commit your \
         work, make sure the tests pass, then end your turn.\n",
    );
    prompt
}

/// Initial message for the reviewer.
pub fn build_review_prompt(record: &TaskRecord, worktree: &Path) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!(
        "# Review task {}: {}\n\n",
        record.id, record.title
    ));
    push_description(&mut prompt, record);
    prompt.push_str(&format!(
        "## Working Directory\n\n{}\n\n",
        worktree.display()
    ));
    prompt.push_str(
        "## Instructions\n\n\
         An implementor has committed a change for this task in the worktree. \
         Review the diff against the task description, write your findings to \
         REVIEW.md, then end your turn.\n",
    );
    prompt
}

/// Initial message for the merger.
pub fn build_merge_prompt(record: &TaskRecord, worktree: &Path) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!("# Merge task {}: {}\n\n", record.id, record.title));
    push_description(&mut prompt, record);
    prompt.push_str(&format!(
        "## Working Directory\n\n{}\n\n",
        worktree.display()
    ));
    prompt.push_str(
        "## Instructions\n\n\
         The change in this worktree has been implemented and reviewed. \
         Resolve any blocking findings in REVIEW.md, merge the change onto \
         the base branch, then end your turn.\n",
    );
    prompt
}

fn push_description(prompt: &mut String, record: &TaskRecord) {
    if record.description.is_empty() {
        return;
    }
    prompt.push_str("## Description\n\n");
    prompt.push_str(&record.description);
    prompt.push_str("\n\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn record() -> TaskRecord {
        TaskRecord::new("t-1", "Add retry logic", "Wrap client calls in backoff")
    }

    #[test]
    fn implementation_prompt_includes_task_and_worktree() {
        let prompt = build_implementation_prompt(&record(), &PathBuf::from("/tmp/wt/t-1"));
        assert!(prompt.contains("# Task t-1: Add retry logic"));
        assert!(prompt.contains("Wrap client calls in backoff"));
        assert!(prompt.contains("/tmp/wt/t-1"));
        assert!(prompt.contains("end your turn"));
    }

    #[test]
    fn empty_description_is_omitted() {
        let record = TaskRecord::new("t-1", "Title only", "");
        let prompt = build_implementation_prompt(&record, &PathBuf::from("/tmp/wt"));
        assert!(!prompt.contains("## Description"));
    }

    #[test]
    fn review_prompt_mentions_the_diff() {
        let prompt = build_review_prompt(&record(), &PathBuf::from("/tmp/wt/t-1"));
        assert!(prompt.contains("Review the diff"));
        assert!(prompt.contains("REVIEW.md"));
    }

    #[test]
    fn merge_prompt_mentions_the_base_branch() {
        let prompt = build_merge_prompt(&record(), &PathBuf::from("/tmp/wt/t-1"));
        assert!(prompt.contains("base branch"));
    }
}
