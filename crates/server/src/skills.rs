use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::api::AppState;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillSummary {
    pub name: String,
    pub description: String,
    pub path: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillsResponse {
    pub skills: Vec<SkillSummary>,
    pub total: usize,
}

pub async fn list_skills(State(state): State<AppState>) -> Json<SkillsResponse> {
    let skills = state
        .catalog
        .iter()
        .map(|entry| SkillSummary {
            name: entry.name.clone(),
            description: entry.descriptor.description.clone(),
            path: entry.location.display().to_string(),
        })
        .collect::<Vec<_>>();

    Json(SkillsResponse { total: skills.len(), skills })
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;

    use axum::http::StatusCode;
    use serde_json::json;
    use skillbridge_agent::fixtures::ScriptedRuntime;
    use skillbridge_core::{CatalogMaterializer, LinkStrategy};
    use tempfile::TempDir;

    use crate::api::test_support::{app, send};

    #[tokio::test]
    async fn lists_materialized_skills_in_name_order() {
        let dir = TempDir::new().expect("tempdir");
        let source = dir.path().join("skills");
        for (name, description) in [("xlsx", "Spreadsheet analysis"), ("pdf", "PDF extraction")] {
            fs::create_dir_all(source.join(name)).expect("bundle dir");
            fs::write(
                source.join(name).join("SKILL.md"),
                format!("---\nname: {name}\ndescription: {description}\n---\n# {name}\n"),
            )
            .expect("descriptor");
        }
        let target = dir.path().join(".claude").join("skills");
        let materialized = CatalogMaterializer::new(&source, &target, LinkStrategy::Copy)
            .materialize()
            .expect("materialize should succeed");

        let (status, body) = send(
            app(materialized.catalog, Arc::new(ScriptedRuntime::default())),
            "GET",
            "/skills",
            None,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 2);
        assert_eq!(body["skills"][0]["name"], "pdf");
        assert_eq!(body["skills"][0]["description"], "PDF extraction");
        assert_eq!(body["skills"][1]["name"], "xlsx");
        assert_eq!(
            body["skills"][1]["path"],
            json!(target.join("xlsx").display().to_string())
        );

        let (_, health) = send(
            app(
                CatalogMaterializer::new(&source, &target, LinkStrategy::Copy)
                    .materialize()
                    .expect("second run should succeed")
                    .catalog,
                Arc::new(ScriptedRuntime::default()),
            ),
            "GET",
            "/health",
            None,
        )
        .await;
        assert_eq!(health["skills_count"], 2);
    }
}
