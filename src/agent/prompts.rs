use std::fmt::Write as _;
use std::path::PathBuf;

use tracing::warn;

use crate::history::Tool;

/// The edit-content rules injected into prompts that author or edit code.
#[derive(Debug, Clone)]
pub struct Rules {
    path: PathBuf,
}

impl Rules {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read fresh on every prompt build. A missing file yields empty rules.
    pub fn load(&self) -> String {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %self.path.display(), "rules file unavailable: {}", e);
                String::new()
            }
        }
    }
}

/// The tools offered to the decision model in this deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCatalog {
    enabled: Vec<Tool>,
}

impl ToolCatalog {
    pub fn all() -> Self {
        Self {
            enabled: Tool::ALL.to_vec(),
        }
    }

    /// Narrow the catalog from a comma list. `finish` and `validate_code` are always kept.
    pub fn parse(list: &str) -> Self {
        let mut enabled = Vec::new();
        for name in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            match name.parse::<Tool>() {
                Ok(tool) if !enabled.contains(&tool) => enabled.push(tool),
                Ok(_) => {}
                Err(e) => warn!("skipping tool in AGENT_TOOLS: {}", e),
            }
        }
        for tool in [Tool::ValidateCode, Tool::Finish] {
            if !enabled.contains(&tool) {
                enabled.push(tool);
            }
        }
        // Keep catalog order stable regardless of how the list was written.
        enabled.sort_by_key(|t| Tool::ALL.iter().position(|a| a == t));
        Self { enabled }
    }

    pub fn is_enabled(&self, tool: Tool) -> bool {
        self.enabled.contains(&tool)
    }

    pub fn tools(&self) -> &[Tool] {
        &self.enabled
    }
}

/// Description and YAML example for one catalog entry. `validate_code` is entered by replying
/// with a python block, so it has no entry of its own.
fn tool_usage(tool: Tool, library: &str) -> Option<String> {
    let text = match tool {
        Tool::ReadFile => r#"read_file: Read content from a file
   - Parameters: target_file (path)
   - Example:
     tool: read_file
     reason: I need to read the main.py file to understand its structure
     params:
       target_file: main.py"#
            .to_string(),
        Tool::EditFile => r#"edit_file: Make changes to a file
   - Parameters: target_file (path), instructions, code_edit
   - Code_edit_instructions:
       - The code changes with context, following these rules:
       - Use "// ... existing code ..." to represent unchanged code between edits
       - Include sufficient context around the changes to resolve ambiguity
       - Minimize repeating unchanged code
       - Never omit code without using the "// ... existing code ..." marker
       - No need to specify line numbers - the context helps locate the changes
   - Example:
     tool: edit_file
     reason: I need to add error handling to the file reading function
     params:
       target_file: utils/read_file.py
       instructions: Add try-except block around the file reading operation
       code_edit: |
            // ... existing code ...
            try:
                content = f.read()
            except OSError:
                content = None
            // ... existing code ..."#
            .to_string(),
        Tool::CreateNewFile => r#"create_new_file: Create a new file
   - Parameters: target_file (path), content
   - Example:
     tool: create_new_file
     reason: I need to create a new file called utils/read_file.py
     params:
       target_file: utils/read_file.py
       content: |
        import logging
        logger = logging.getLogger(__name__)
        logger.info("New file created")"#
            .to_string(),
        Tool::GrepSearch => r#"grep_search: Search for patterns in files
   - Parameters: query, case_sensitive (optional), include_pattern (optional), exclude_pattern (optional)
   - Example:
     tool: grep_search
     reason: I need to find all occurrences of 'logger' in Python files
     params:
       query: logger
       include_pattern: "*.py"
       case_sensitive: false"#
            .to_string(),
        Tool::ListDir => r#"list_dir: List contents of a directory
   - Parameters: relative_workspace_path
   - Example:
     tool: list_dir
     reason: I need to see all files in the utils directory
     params:
       relative_workspace_path: utils
   - Result: Returns a tree visualization of the directory structure"#
            .to_string(),
        Tool::SearchApiDocstrings => format!(
            r#"search_api_docstrings: Search the signature or docstring of a class or function{}. Can also do free text (regex) search.
   - Parameters: query, case_sensitive (optional)
   - Example:
     tool: search_api_docstrings
     reason: I need to check the signature or docstring of the class called "Junction"
     params:
       query: Junction
   - Result: Returns the signature and the docstring of the class or function"#,
            library
        ),
        Tool::Finish => r#"finish: End the process and provide final code output
   - No parameters required
   - Example:
     tool: finish
     reason: I have completed the requested task of finding all logger instances
     params: {}"#
            .to_string(),
        Tool::ValidateCode => return None,
    };
    Some(text)
}

/// The prompt that asks the model for its next tool.
pub fn decision_prompt(
    user_query: &str,
    history_summary: &str,
    rules: &str,
    catalog: &ToolCatalog,
    library: Option<&str>,
) -> String {
    let library_phrase = library
        .map(|l| format!(" of the {} library", l))
        .unwrap_or_default();

    let mut tools = String::new();
    let mut names = Vec::new();
    for tool in catalog.tools() {
        if let Some(usage) = tool_usage(*tool, &library_phrase) {
            names.push(tool.as_str());
            let _ = writeln!(tools, "{}. {}\n", names.len(), usage);
        }
    }

    let mut prompt = String::from(
        "You are a coding assistant that helps modify and navigate code. Given the following request,\n\
         decide which tool to use from the available options.\n\
         Do not finish until you provide a sample code. You can ask the user for more details, but always provide a sample code.\n\
         If the task ask you to write code, before you write any code, always do a thorough search first and then write the code.\n",
    );
    if catalog.is_enabled(Tool::ValidateCode) {
        prompt.push_str(
            "To check a piece of python code, reply with the code in a ```python block instead of YAML.\n",
        );
    }
    let _ = writeln!(
        prompt,
        "When generating content for new files or editing existing files, follow these rules: {}",
        rules
    );
    if let Some(library) = library {
        let _ = writeln!(
            prompt,
            "Generated code targets the {} library. Look up its API before using it.",
            library
        );
    }
    let _ = write!(
        prompt,
        "\nUser request: {}\n\nHere are the actions you performed:\n{}\n\nAvailable tools:\n{}",
        user_query, history_summary, tools
    );
    let _ = write!(
        prompt,
        "Respond with a YAML object containing:\n\
         ```yaml\n\
         tool: one of: {}\n\
         reason: |\n  \
           detailed explanation of why you chose this tool and what you intend to do\n  \
           if you chose finish, explain why no more actions are needed\n\
         params:\n  \
           # parameters specific to the chosen tool\n\
         ```\n\n\
         If you believe no more actions are needed, use \"finish\" as the tool and explain why in the reason.\n",
        names.join(", ")
    );
    prompt
}

/// Ask for line operations that realise an elided `code_edit` against the file.
pub fn plan_prompt(file_content: &str, instructions: &str, code_edit: &str) -> String {
    format!(
        r#"As a code editing assistant, I need to convert the following code edit instruction
and code edit pattern into specific edit operations (start_line, end_line, replacement).

FILE CONTENT:
{file_content}

EDIT INSTRUCTIONS:
{instructions}

CODE EDIT PATTERN (markers like "// ... existing code ..." indicate unchanged code):
{code_edit}

Analyze the file content and the edit pattern to determine exactly where changes should be made.
Be very careful with start and end lines. They are 1-indexed and inclusive. These will be REPLACED, not APPENDED!
If you want APPEND, just copy that line as the first line of the replacement.
To delete lines, leave out the replacement. Ranges must not overlap.
Return a YAML object with your reasoning and an array of edit operations:

```yaml
reasoning: |
  Explain how you interpreted the edit pattern and how you located each edit in the file.
  Be precise with the start and end lines. Reason why not 1 line before or after.

operations:
  - start_line: 10
    end_line: 15
    replacement: |
      def process_file(filename):
          try:
              with open(filename, 'r') as f:
                  return f.read()
          except FileNotFoundError:
              return None

  - start_line: 25
    end_line: 25
    replacement: |
      logger.info("File processing completed")
```

For lines that include "// ... existing code ...", do not include them in the replacement.
Instead, identify the exact lines they represent in the existing file and set the line
numbers accordingly. Start_line and end_line are 1-indexed.

If the instruction indicates content should be appended to the file, set both start_line and end_line
to the maximum line number + 1, which will add the content at the end of the file.
"#
    )
}

/// Ask for a corrected version of code that failed validation.
pub fn fix_prompt(code: &str, errors: &str, rules: &str) -> String {
    format!(
        "You are a coding assistant. You have just written a python code.\n\
         Fix the code to remove all the errors.\n\
         Return only the fixed code, no other text.\n\
         Code editing rules: {}\n\n\
         Reported errors:\n{}\n\n\
         Code:\n{}\n",
        rules, errors, code
    )
}

pub fn response_prompt(user_query: &str, history_summary: &str) -> String {
    format!(
        r#"You are a coding assistant. You have just performed a series of actions based on the
user's request. Summarize what you did in a clear, helpful response.

User request: {user_query}

Here are the actions you performed:
{history_summary}

Generate a comprehensive yet concise response that explains:
1. What actions were taken
2. What was found or modified
3. Any next steps the user might want to take

IMPORTANT:
- Focus on the outcomes and results, not the specific tools used
- Write as if you are directly speaking to the user
- When providing code examples, enclose them in triple backticks
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_parse_keeps_mandatory_tools() {
        let catalog = ToolCatalog::parse("list_dir, bogus ,read_file,list_dir");
        assert_eq!(
            catalog.tools(),
            &[Tool::ReadFile, Tool::ListDir, Tool::ValidateCode, Tool::Finish]
        );
        assert!(!catalog.is_enabled(Tool::EditFile));
        assert!(ToolCatalog::all().is_enabled(Tool::SearchApiDocstrings));
    }

    #[test]
    fn test_decision_prompt_lists_only_enabled_tools() {
        let catalog = ToolCatalog::parse("list_dir");
        let prompt = decision_prompt("list utils", "No previous actions.", "R1", &catalog, None);
        assert!(prompt.contains("1. list_dir: List contents"));
        assert!(prompt.contains("2. finish: End the process"));
        assert!(!prompt.contains("read_file:"));
        assert!(prompt.contains("tool: one of: list_dir, finish"));
        assert!(prompt.contains("follow these rules: R1"));
        assert!(prompt.contains("User request: list utils"));
        assert!(prompt.contains("```python block"));
    }

    #[test]
    fn test_library_hint() {
        let prompt = decision_prompt("q", "h", "", &ToolCatalog::all(), Some("cmtj"));
        assert!(prompt.contains("function of the cmtj library"));
        assert!(prompt.contains("targets the cmtj library"));
        let plain = decision_prompt("q", "h", "", &ToolCatalog::all(), None);
        assert!(plain.contains("class or function. Can also"));
    }

    #[test]
    fn test_missing_rules_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Rules::new(dir.path().join("absent.txt")).load(), "");
        let path = dir.path().join("rules.txt");
        std::fs::write(&path, "use 4 spaces").unwrap();
        assert_eq!(Rules::new(&path).load(), "use 4 spaces");
    }
}
