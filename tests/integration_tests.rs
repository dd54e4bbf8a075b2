//! End-to-end integration tests for sharpsearch.
//!
//! These drive full reindex cycles against temp directories with a
//! deterministic in-process embedding provider; nothing touches the
//! network.

mod helpers;

use helpers::TestEnv;
use pretty_assertions::assert_eq;
use sharpsearch::index::SearchFilter;
use tokio_util::sync::CancellationToken;

const FOO_SOURCE: &str = r#"namespace Demo
{
    public class Worker
    {
        public int Foo(int input)
        {
            var shifted = input << 1;
            return shifted + 1;
        }
    }
}
"#;

const PI_SOURCE: &str = "#define PI 3.14159\n";

fn cancel() -> CancellationToken {
    CancellationToken::new()
}

#[test]
fn test_cold_index_and_search() {
    let env = TestEnv::new();
    env.write("a.cs", FOO_SOURCE);
    env.write("b.h", PI_SOURCE);

    let indexer = env
        .registry
        .get_or_create("demo", env.root.path())
        .unwrap();
    let stats = indexer.index_directory(false, None, &cancel()).unwrap();

    assert!(stats.chunks_created >= 2, "stats: {:?}", stats);
    let statistics = indexer.stats().unwrap();
    assert_eq!(statistics.file_count, 2);
    assert!(statistics.chunk_count >= 2);
    assert_eq!(statistics.live_vectors, statistics.chunk_count);

    let results = indexer.search("Foo", 5, false).unwrap();
    assert!(!results.is_empty());
    assert!(
        results[0].path.ends_with("a.cs"),
        "top hit: {} ({})",
        results[0].path,
        results[0].kind_tag
    );
}

#[test]
fn test_incremental_add_with_auth_classification() {
    let env = TestEnv::new();
    env.write("a.cs", FOO_SOURCE);

    let indexer = env
        .registry
        .get_or_create("demo", env.root.path())
        .unwrap();
    indexer.index_directory(false, None, &cancel()).unwrap();

    env.write(
        "c.cs",
        "public class Gate\n{\n    public bool Check(string user)\n    {\n        return Authorize(user) && CheckCredentials(user);\n    }\n}\n",
    );
    let stats = indexer.index_directory(false, None, &cancel()).unwrap();
    assert!(stats.files_indexed >= 1);

    // The new chunks carry the auth suffix.
    let filter = SearchFilter {
        chunk_types: vec!["method-auth".to_string(), "class-auth".to_string()],
        path_contains: None,
    };
    let results = indexer
        .search_with_filters("login", 5, &filter, true)
        .unwrap();
    assert!(!results.is_empty(), "expected an auth-tagged hit");
    assert!(results.iter().any(|r| r.path.ends_with("c.cs")));
    assert!(results.iter().all(|r| r.kind_tag.ends_with("-auth")));
}

#[test]
fn test_deletion_propagates() {
    let env = TestEnv::new();
    env.write("a.cs", FOO_SOURCE);
    env.write("b.h", PI_SOURCE);

    let indexer = env
        .registry
        .get_or_create("demo", env.root.path())
        .unwrap();
    indexer.index_directory(false, None, &cancel()).unwrap();
    assert!(!indexer.search("Foo", 5, false).unwrap().is_empty());

    env.remove("a.cs");
    let stats = indexer.index_directory(false, None, &cancel()).unwrap();
    assert_eq!(stats.files_removed, 1);

    let results = indexer.search("Foo", 5, false).unwrap();
    assert!(
        results.iter().all(|r| !r.path.ends_with("a.cs")),
        "stale hit from a.cs: {:?}",
        results.iter().map(|r| &r.path).collect::<Vec<_>>()
    );

    let statistics = indexer.stats().unwrap();
    assert_eq!(statistics.file_count, 1);
}

#[test]
fn test_reindex_is_idempotent() {
    let env = TestEnv::new();
    env.write("a.cs", FOO_SOURCE);

    let indexer = env
        .registry
        .get_or_create("demo", env.root.path())
        .unwrap();
    let first = indexer.index_directory(false, None, &cancel()).unwrap();
    assert!(first.chunks_created > 0);
    let chunk_count = indexer.stats().unwrap().chunk_count;

    // No filesystem changes: the second cycle is a no-op.
    let second = indexer.index_directory(false, None, &cancel()).unwrap();
    assert_eq!(second.chunks_created, 0);
    assert_eq!(second.files_indexed, 0);
    assert_eq!(indexer.stats().unwrap().chunk_count, chunk_count);
}

#[test]
fn test_force_reindex_preserves_embedding_cache() {
    let env = TestEnv::new();
    env.write("a.cs", FOO_SOURCE);
    env.write("b.h", PI_SOURCE);

    let indexer = env
        .registry
        .get_or_create("demo", env.root.path())
        .unwrap();
    let cold = indexer.index_directory(false, None, &cancel()).unwrap();
    assert_eq!(cold.cache_hits, 0);

    let cache = env.registry.embedder().cache();
    let size_before = cache.size().unwrap();
    assert!(size_before > 0);

    // Force: store and index are rebuilt, embeddings come from the cache.
    let forced = indexer.index_directory(true, None, &cancel()).unwrap();
    assert!(forced.chunks_created > 0);
    assert!(
        forced.cache_hits >= forced.chunks_created,
        "every unchanged chunk should hit the cache: {:?}",
        forced
    );
    assert!(cache.size().unwrap() >= size_before);

    // The rebuilt index still answers searches.
    assert!(!indexer.search("Foo", 5, false).unwrap().is_empty());
}

#[test]
fn test_clear_preserves_embedding_cache() {
    let env = TestEnv::new();
    env.write("a.cs", FOO_SOURCE);

    let indexer = env
        .registry
        .get_or_create("demo", env.root.path())
        .unwrap();
    indexer.index_directory(false, None, &cancel()).unwrap();

    let cache = env.registry.embedder().cache();
    let size_before = cache.size().unwrap();
    assert!(size_before > 0);

    indexer.clear().unwrap();
    assert_eq!(indexer.stats().unwrap().chunk_count, 0);
    assert_eq!(indexer.stats().unwrap().live_vectors, 0);
    assert_eq!(cache.size().unwrap(), size_before);

    // Indexing again after the clear works and hits the cache.
    let again = indexer.index_directory(false, None, &cancel()).unwrap();
    assert!(again.cache_hits > 0);
}

#[test]
fn test_modified_file_replaces_chunks() {
    let env = TestEnv::new();
    env.write("a.cs", FOO_SOURCE);

    let indexer = env
        .registry
        .get_or_create("demo", env.root.path())
        .unwrap();
    indexer.index_directory(false, None, &cancel()).unwrap();

    env.write(
        "a.cs",
        "namespace Demo\n{\n    public class Worker\n    {\n        public int Renamed(int x)\n        {\n            return x;\n        }\n    }\n}\n",
    );
    let stats = indexer.index_directory(false, None, &cancel()).unwrap();
    assert!(stats.files_indexed >= 1);

    let results = indexer.search("Renamed", 5, false).unwrap();
    assert!(results.iter().any(|r| r.text.contains("Renamed")));

    // The old method no longer exists anywhere in the index.
    let stale = indexer.search("Foo", 5, false).unwrap();
    assert!(stale.iter().all(|r| !r.text.contains("int Foo")));
}

#[test]
fn test_ignored_directories_are_not_indexed() {
    let env = TestEnv::new();
    env.write("a.cs", FOO_SOURCE);
    env.write("bin/Debug/generated.cs", "public class FromBuildOutput { }");
    env.write("obj/temp.cs", "public class FromObj { }");

    let indexer = env
        .registry
        .get_or_create("demo", env.root.path())
        .unwrap();
    indexer.index_directory(false, None, &cancel()).unwrap();

    assert_eq!(indexer.stats().unwrap().file_count, 1);
}

#[test]
fn test_two_projects_same_directory_are_independent() {
    let env = TestEnv::new();
    env.write("a.cs", FOO_SOURCE);

    let x = env.registry.get_or_create("proj-x", env.root.path()).unwrap();
    let y = env.registry.get_or_create("proj-y", env.root.path()).unwrap();

    let sx = x.index_directory(false, None, &cancel()).unwrap();
    let sy = y.index_directory(false, None, &cancel()).unwrap();
    assert!(sx.chunks_created > 0);
    assert!(sy.chunks_created > 0);

    // Clearing one project leaves the other searchable.
    x.clear().unwrap();
    assert_eq!(x.stats().unwrap().chunk_count, 0);
    assert!(!y.search("Foo", 5, false).unwrap().is_empty());
}

#[test]
fn test_search_filter_by_path() {
    let env = TestEnv::new();
    env.write("Services/OrderService.cs", FOO_SOURCE);
    env.write("Controllers/OrderController.cs", FOO_SOURCE.replace("Worker", "OrdersApi").as_str());

    let indexer = env
        .registry
        .get_or_create("demo", env.root.path())
        .unwrap();
    indexer.index_directory(false, None, &cancel()).unwrap();

    let filter = SearchFilter {
        chunk_types: vec![],
        path_contains: Some("Controllers".to_string()),
    };
    let results = indexer
        .search_with_filters("Foo", 10, &filter, false)
        .unwrap();
    assert!(!results.is_empty());
    assert!(results.iter().all(|r| r.path.contains("Controllers")));
}

#[test]
fn test_k_zero_returns_empty() {
    let env = TestEnv::new();
    env.write("a.cs", FOO_SOURCE);

    let indexer = env
        .registry
        .get_or_create("demo", env.root.path())
        .unwrap();
    indexer.index_directory(false, None, &cancel()).unwrap();

    assert!(indexer.search("Foo", 0, false).unwrap().is_empty());
}
