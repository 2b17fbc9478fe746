use serde::{Deserialize, Serialize};
use thiserror::Error;

/// File every skill bundle must carry at its root.
pub const DESCRIPTOR_FILE: &str = "SKILL.md";

/// Parsed `SKILL.md`: YAML frontmatter followed by markdown usage guidance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SkillDescriptor {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub when_to_use: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<String>,
    #[serde(skip)]
    pub body: String,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("missing YAML frontmatter (file must start with `---`)")]
    MissingFrontmatter,
    #[error("frontmatter is not terminated by a `---` line")]
    UnterminatedFrontmatter,
    #[error("invalid YAML frontmatter: {0}")]
    InvalidYaml(String),
    #[error("frontmatter field `{0}` is required")]
    MissingField(&'static str),
}

#[derive(Debug, Default, Deserialize)]
struct Frontmatter {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default, alias = "when-to-use")]
    when_to_use: Option<String>,
    #[serde(default, rename = "allowed-tools", alias = "allowed_tools")]
    allowed_tools: Option<String>,
}

impl SkillDescriptor {
    pub fn parse(input: &str) -> Result<Self, DescriptorError> {
        let input = input.replace("\r\n", "\n");
        let mut lines = input.split('\n');

        if lines.next() != Some("---") {
            return Err(DescriptorError::MissingFrontmatter);
        }

        let mut frontmatter_lines = Vec::new();
        let mut terminated = false;
        for line in &mut lines {
            if line.trim_end() == "---" {
                terminated = true;
                break;
            }
            frontmatter_lines.push(line);
        }
        if !terminated {
            return Err(DescriptorError::UnterminatedFrontmatter);
        }

        let raw = frontmatter_lines.join("\n");
        let frontmatter = if raw.trim().is_empty() {
            Frontmatter::default()
        } else {
            serde_yaml::from_str::<Frontmatter>(&raw)
                .map_err(|error| DescriptorError::InvalidYaml(error.to_string()))?
        };

        let name = frontmatter.name.trim().to_string();
        if name.is_empty() {
            return Err(DescriptorError::MissingField("name"));
        }
        let description = frontmatter.description.trim().to_string();
        if description.is_empty() {
            return Err(DescriptorError::MissingField("description"));
        }

        Ok(Self {
            name,
            description,
            when_to_use: frontmatter.when_to_use.filter(|value| !value.trim().is_empty()),
            allowed_tools: frontmatter.allowed_tools.filter(|value| !value.trim().is_empty()),
            body: lines.collect::<Vec<_>>().join("\n").trim().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{DescriptorError, SkillDescriptor};

    #[test]
    fn parses_frontmatter_and_body() {
        let input = "---\nname: pdf\ndescription: Extract text and tables from PDF files\nwhen-to-use: user mentions a .pdf\nallowed-tools: Read Bash\n---\n\n# PDF\n\nRun `scripts/extract.py`.\n";

        let descriptor = SkillDescriptor::parse(input).expect("descriptor should parse");

        assert_eq!(descriptor.name, "pdf");
        assert_eq!(descriptor.description, "Extract text and tables from PDF files");
        assert_eq!(descriptor.when_to_use.as_deref(), Some("user mentions a .pdf"));
        assert_eq!(descriptor.allowed_tools.as_deref(), Some("Read Bash"));
        assert!(descriptor.body.starts_with("# PDF"));
    }

    #[test]
    fn accepts_windows_line_endings() {
        let input = "---\r\nname: xlsx\r\ndescription: Spreadsheets\r\n---\r\nBody\r\n";

        let descriptor = SkillDescriptor::parse(input).expect("descriptor should parse");

        assert_eq!(descriptor.name, "xlsx");
        assert_eq!(descriptor.body, "Body");
    }

    #[test]
    fn rejects_missing_frontmatter() {
        assert_eq!(
            SkillDescriptor::parse("# Title\nBody"),
            Err(DescriptorError::MissingFrontmatter)
        );
    }

    #[test]
    fn rejects_unterminated_frontmatter() {
        assert_eq!(
            SkillDescriptor::parse("---\nname: pdf\ndescription: x\n"),
            Err(DescriptorError::UnterminatedFrontmatter)
        );
    }

    #[test]
    fn rejects_invalid_yaml() {
        let error = SkillDescriptor::parse("---\nname: [unterminated\n---\nBody")
            .expect_err("yaml should not parse");

        assert!(error.to_string().contains("invalid YAML"));
    }

    #[test]
    fn requires_name_and_description() {
        assert_eq!(
            SkillDescriptor::parse("---\ndescription: orphan\n---\n"),
            Err(DescriptorError::MissingField("name"))
        );
        assert_eq!(
            SkillDescriptor::parse("---\nname: pdf\n---\n"),
            Err(DescriptorError::MissingField("description"))
        );
    }
}
