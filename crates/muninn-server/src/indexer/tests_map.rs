// crates/muninn-server/src/indexer/tests_map.rs
// Test-to-source mapping. Two inference rules:
//   foo.(test|spec).ext  -> foo.ext
//   dir/__tests__/x.ext  -> dir/x.ext
// Matches become file-file `tests` relationships at strength 9.

use crate::args;
use crate::db::relate;
use crate::store::Store;
use anyhow::Result;

/// Infer the source path a test file covers, or None when the path
/// doesn't look like a test.
pub fn infer_source_path(test_path: &str) -> Option<String> {
    // dir/__tests__/x -> dir/x (strip the __tests__ segment)
    if test_path.contains("__tests__/") {
        let stripped = test_path.replacen("__tests__/", "", 1);
        // A file may use both conventions at once
        return Some(strip_test_infix(&stripped).unwrap_or(stripped));
    }
    strip_test_infix(test_path)
}

/// foo.test.ts / foo.spec.ts -> foo.ts
fn strip_test_infix(path: &str) -> Option<String> {
    for infix in [".test.", ".spec."] {
        if let Some(idx) = path.rfind(infix) {
            let (stem, rest) = path.split_at(idx);
            let ext = &rest[infix.len()..];
            return Some(format!("{stem}.{ext}"));
        }
    }
    None
}

/// Record `tests` relationships for every test file whose source exists in
/// the files table. Both endpoints are created on demand (files are
/// created on first reference).
pub async fn map_tests_to_sources(
    store: &Store,
    project_id: i64,
    test_files: &[String],
) -> Result<usize> {
    let mut mapped = 0;
    for test_path in test_files {
        let Some(source_path) = infer_source_path(test_path) else {
            continue;
        };

        let test_id = ensure_file(store, project_id, test_path).await?;
        let source_id = ensure_file(store, project_id, &source_path).await?;

        if relate(
            store,
            project_id,
            ("file", test_id),
            ("file", source_id),
            "tests",
            9.0,
            None,
        )
        .await
        .is_ok()
        {
            mapped += 1;
        }
    }
    Ok(mapped)
}

async fn ensure_file(store: &Store, project_id: i64, path: &str) -> Result<i64> {
    store
        .run(
            "INSERT INTO files (project_id, path) VALUES (?1, ?2)
             ON CONFLICT(project_id, path) DO UPDATE SET updated_at = CURRENT_TIMESTAMP",
            args![project_id, path],
        )
        .await?;
    let id: i64 = store
        .get(
            "SELECT id FROM files WHERE project_id = ?1 AND path = ?2",
            args![project_id, path],
        )
        .await?
        .map(|r| r.get(0))
        .transpose()?
        .unwrap_or(0);
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_test_suffix() {
        assert_eq!(infer_source_path("src/user.test.ts"), Some("src/user.ts".into()));
        assert_eq!(infer_source_path("src/user.spec.tsx"), Some("src/user.tsx".into()));
    }

    #[test]
    fn test_infer_tests_directory() {
        assert_eq!(
            infer_source_path("src/__tests__/user.ts"),
            Some("src/user.ts".into())
        );
        assert_eq!(
            infer_source_path("src/__tests__/user.test.ts"),
            Some("src/user.ts".into())
        );
    }

    #[test]
    fn test_non_test_paths_skipped() {
        assert_eq!(infer_source_path("src/user.ts"), None);
        assert_eq!(infer_source_path("src/testing.ts"), None);
    }

    #[tokio::test]
    async fn test_mapping_emits_tests_relationship() {
        let store = Store::open_in_memory().await.unwrap();
        let project = crate::db::get_or_create_project(&store, "/p", None).await.unwrap();

        let mapped = map_tests_to_sources(
            &store,
            project.id,
            &["src/user.test.ts".to_string(), "src/main.ts".to_string()],
        )
        .await
        .unwrap();
        assert_eq!(mapped, 1);

        let row = store
            .get(
                "SELECT relationship, strength FROM relationships LIMIT 1",
                args![],
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.get::<String>(0).unwrap(), "tests");
        assert_eq!(row.get::<f64>(1).unwrap(), 9.0);
    }
}
