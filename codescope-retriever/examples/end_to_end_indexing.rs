//! End-to-end example: index a small workspace, search it, and build prompt context.
//!
//! Run with `cargo run -p codescope-retriever --example end_to_end_indexing`.

use anyhow::Result;
use codescope_context::ContextAssembler;
use codescope_retriever::{
    config::IndexingEngineConfig,
    retrieval::{
        indexing_engine::{IndexingEngine, ScanOptions},
        retrieval_service::{RetrievalService, SearchOptions},
    },
};
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;
use tokio_stream::StreamExt;

const USER_SERVICE_TS: &str = r#"import { Database } from "./db";

export class UserService {
  constructor(private db: Database) {}

  async findUser(id: string) {
    const rows = await this.db.query("select * from users where id = ?", [id]);
    return rows[0];
  }

  async deleteUser(id: string) {
    await this.db.execute("delete from users where id = ?", [id]);
  }
}
"#;

const AUTH_PY: &str = r#"import hashlib


def hash_password(password, salt):
    return hashlib.sha256((salt + password).encode()).hexdigest()


class Authenticator:
    def __init__(self, users):
        self.users = users

    def login(self, name, password):
        user = self.users.get(name)
        return user is not None and user.password == hash_password(password, user.salt)
"#;

const HANDLERS_GO: &str = r#"package api

import (
	"encoding/json"
	"net/http"
)

type Server struct {
	users map[string]string
}

func (s *Server) HandleUser(w http.ResponseWriter, r *http.Request) {
	json.NewEncoder(w).Encode(s.users[r.URL.Query().Get("id")])
}
"#;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("🚀 Starting end-to-end indexing and search example...\n");

    let temp_dir = tempdir()?;
    let repo_path = temp_dir.path().to_path_buf();
    create_test_files(&repo_path).await?;
    println!("📁 Created test workspace at: {}", repo_path.display());

    let config = IndexingEngineConfig::new(&repo_path).with_batch_size(2);
    let engine = Arc::new(IndexingEngine::open(config).await?);

    println!("🔄 Starting full scan...");
    let Some(handle) = engine.start_full_scan(ScanOptions::default()) else {
        anyhow::bail!("a scan is already running");
    };
    let mut progress = handle.progress_stream();
    let reporter = tokio::spawn(async move {
        while let Some(p) = progress.next().await {
            println!("📊 Progress: {}/{}", p.processed, p.total);
        }
    });
    let report = handle.join().await;
    reporter.abort();

    let index_stats = engine.index_stats().await?;
    println!("\n📈 Final Statistics:");
    println!("   Files indexed: {}", report.files_indexed);
    println!("   Chunks written: {}", report.chunks_written);
    println!("   Errors: {}", report.errors);
    for (chunk_type, count) in &index_stats.by_type {
        println!("   {chunk_type}: {count}");
    }

    let service = RetrievalService::new(Arc::clone(engine.store()));
    let search_queries = [
        ("user lookups", "find user"),
        ("password handling", "hash password"),
        ("HTTP handlers", "handle user request"),
    ];
    for (description, query) in search_queries {
        println!("\n🔎 Searching for {description} (query: '{query}')");
        let results = service.search(query, &SearchOptions::default()).await?;
        for (i, result) in results.iter().enumerate() {
            let chunk = &result.chunk;
            println!(
                "   {}. [{:.2}] {} {} {}:{}-{}",
                i + 1,
                result.score,
                chunk.chunk_type,
                chunk.metadata.name,
                chunk.file_path,
                chunk.metadata.start_line,
                chunk.metadata.end_line
            );
        }
        if results.is_empty() {
            println!("   ⚠️  No results found for '{query}'");
        }
    }

    println!("\n🧩 Augmented prompt:");
    let prompt = service
        .augment_prompt("Why does login fail?", "login password", Some("python"), 2)
        .await;
    println!("{prompt}");

    println!("\n📦 Assembled context (200 token budget):");
    let items = service
        .context_items("user", &SearchOptions::default().with_limit(3))
        .await?;
    println!("{}", ContextAssembler::default().build(&items, 200));

    println!("\n🎉 End-to-end example completed successfully!");
    Ok(())
}

/// Create a small polyglot workspace
async fn create_test_files(repo_path: &Path) -> Result<()> {
    for (path, content) in [
        ("web/user_service.ts", USER_SERVICE_TS),
        ("auth/auth.py", AUTH_PY),
        ("api/handlers.go", HANDLERS_GO),
    ] {
        let path = repo_path.join(path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, content).await?;
    }
    Ok(())
}
