//! Prompt text sent to the generation backend.

use crate::patch::DELIMITER;

/// Full prompt for a user request: fixed instructions, the task, then the
/// encoded source payload.
pub fn instruction_prompt(user_prompt: &str, encoded_source: &str) -> String {
    let d = DELIMITER;
    format!(
        "Source code for my project is given below between 'SOURCE_START' and 'SOURCE_END'.
Your specific instructions for exactly how to add, update, or delete code from my project's source code is between 'TASK_START' and 'TASK_END'.
In the source code, lines starting with {d} are paths to files, followed by that file's content on the next line.
Existing project dependencies are provided. Reuse existing dependencies when applicable.
Add or remove dependencies in the dependency manifest (for example package.json) when needed, and provide the entire file in the response with only the needed changes.
Always include or remove the corresponding @types package if relevant to the added or removed package.
Your output should only contain {d}put_file_path_here followed by the updated contents of that file.
Do not give other output except for that, meaning no explanation or markup.
NEVER put comments in JSON files. Do not add single line comments in the code. Do not remove existing comments.
If a file should be removed entirely, include a {d}file_path line with a blank line following.
TASK_START
{user_prompt}
TASK_END
SOURCE_START
{encoded_source}
SOURCE_END"
    )
}

/// Follow-up prompt after a failed build: the check that ran, its raw
/// output, and the current source payload.
pub fn resolution_prompt(check: &str, output: &str, encoded_source: &str) -> String {
    let d = DELIMITER;
    format!(
        "After running command \"{check}\" I get the error between 'OUTPUT_START' and 'OUTPUT_END' below:
OUTPUT_START
{output}
OUTPUT_END
Update my project source code to fix these errors.
My project source code is given below between 'SOURCE_START' and 'SOURCE_END'.
In the source code, lines starting with {d} are paths to files, followed by that file's content on the next line.
Your output should only contain {d}put_file_path_here followed by the updated contents of that file.
Do not give other output except for that, meaning no explanation or markup. Do not add or remove any comments in the code.
SOURCE_START
{encoded_source}
SOURCE_END"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_prompt_wraps_task_and_source() {
        let prompt = instruction_prompt("add a health check route", "~~server.ts\nconst a = 1;\n");
        assert!(prompt.contains("TASK_START\nadd a health check route\nTASK_END"));
        assert!(prompt.contains("SOURCE_START\n~~server.ts\nconst a = 1;\n\nSOURCE_END"));
        assert!(prompt.contains("lines starting with ~~ are paths"));
    }

    #[test]
    fn test_resolution_prompt_embeds_output() {
        let prompt = resolution_prompt("pnpm build", "error TS2304", "~~a.ts\nx\n");
        assert!(prompt.contains("\"pnpm build\""));
        assert!(prompt.contains("OUTPUT_START\nerror TS2304\nOUTPUT_END"));
        assert!(prompt.ends_with("SOURCE_END"));
    }
}
