use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use gmp_rag_core::{
    expand_pdf_inputs, read_upload, AnthropicGenerator, AppConfig, ChatSession, ConfigError,
    Credentials, EmbeddingBackend, EmbeddingProvider, HashingEmbedder, IngestStatus, MemoryIndex,
    OpenAiEmbedder, PersistentIndex, StoreBackend, VectorIndex,
};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "gmp-rag", version, about = "Question answering over uploaded cGMP regulation PDFs")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// TOML config file (defaults to ./gmp-rag.toml when present)
    #[arg(long, global = true, env = "GMP_RAG_CONFIG")]
    config: Option<PathBuf>,

    /// Vector index backend: persistent or memory
    #[arg(long, global = true)]
    backend: Option<StoreBackend>,

    /// Directory for the persistent index
    #[arg(long, global = true)]
    index_dir: Option<PathBuf>,

    /// Snapshot file the memory backend is loaded from and saved to
    #[arg(long, global = true)]
    snapshot: Option<PathBuf>,

    /// Number of chunks retrieved per question
    #[arg(long, global = true)]
    top_k: Option<usize>,

    /// Use the local hashing embedder instead of the embeddings API
    #[arg(long, global = true, default_value_t = false)]
    offline: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Extract, chunk and index PDF files or folders of PDFs.
    Ingest {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Answer one question from the indexed documents.
    Ask { question: String },
    /// Interactive question loop with document commands.
    Chat,
    /// Show the total chunk count and chunks per file.
    Stats,
    /// Delete everything in the index.
    Reset,
}

/// The index plus what is needed to persist it after writes.
enum IndexHandle {
    Persistent(Arc<PersistentIndex>),
    Memory {
        index: Arc<MemoryIndex>,
        snapshot: Option<PathBuf>,
    },
}

impl IndexHandle {
    async fn open(config: &AppConfig, embedder: Arc<dyn EmbeddingProvider>) -> anyhow::Result<Self> {
        match config.store.backend {
            StoreBackend::Persistent => {
                let index = PersistentIndex::open(config.persistent_index(), embedder)
                    .await
                    .context("데이터베이스 초기화 실패")?;
                Ok(IndexHandle::Persistent(Arc::new(index)))
            }
            StoreBackend::Memory => {
                let snapshot = config.store.snapshot_path.clone();
                let index = match snapshot.as_deref().filter(|path| path.is_file()) {
                    Some(path) => {
                        let blob = tokio::fs::read(path)
                            .await
                            .with_context(|| format!("failed to read snapshot {}", path.display()))?;
                        MemoryIndex::restore(&blob, embedder)
                            .with_context(|| format!("failed to restore snapshot {}", path.display()))?
                    }
                    None => MemoryIndex::new(embedder),
                };
                Ok(IndexHandle::Memory {
                    index: Arc::new(index),
                    snapshot,
                })
            }
        }
    }

    fn shared(&self) -> Arc<dyn VectorIndex> {
        match self {
            IndexHandle::Persistent(index) => index.clone(),
            IndexHandle::Memory { index, .. } => index.clone(),
        }
    }

    /// Writes the memory backend's snapshot when a staging file is configured.
    async fn persist(&self) -> anyhow::Result<()> {
        if let IndexHandle::Memory {
            index,
            snapshot: Some(path),
        } = self
        {
            let blob = index.snapshot().await?;
            tokio::fs::write(path, blob)
                .await
                .with_context(|| format!("failed to write snapshot {}", path.display()))?;
            info!(path = %path.display(), "saved index snapshot");
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let credentials = config.credentials();

    if let Err(error) = config.validate(&credentials) {
        if matches!(error, ConfigError::MissingCredentials(_)) {
            eprintln!("⚠️ {error}");
            eprintln!("💡 설정 파일(gmp-rag.toml)의 [api_keys] 섹션이나 환경변수를 확인해주세요.");
        }
        return Err(error.into());
    }

    let embedder = build_embedder(&config, &credentials)?;
    let generator = build_generator(&config, &credentials)?;
    let handle = IndexHandle::open(&config, embedder).await?;

    let mut session = ChatSession::new(handle.shared(), generator)
        .with_options(config.ingestion_options())
        .with_top_k(config.retrieval.top_k);
    if let Err(error) = session.load_processed_files().await {
        warn!(%error, "could not read processed files from index");
    }

    info!(
        version = app_version,
        session = %session.id(),
        backend = session.backend_name(),
        started_at = %Utc::now().to_rfc3339(),
        "gmp-rag boot"
    );

    match cli.command {
        Command::Ingest { paths } => {
            if config.store.is_ephemeral() {
                warn!("memory backend without --snapshot, indexed chunks are dropped on exit");
                eprintln!("⚠️ 메모리 백엔드에 --snapshot 파일이 없어 처리 결과가 종료 시 사라집니다.");
            }
            run_ingest(&mut session, &paths).await?;
            handle.persist().await?;
        }
        Command::Ask { question } => {
            run_ask(&mut session, &question).await;
        }
        Command::Chat => {
            run_chat(&mut session, &handle, &credentials).await?;
        }
        Command::Stats => {
            print_stats(&session).await?;
        }
        Command::Reset => {
            run_reset(&mut session).await;
            handle.persist().await?;
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    let mut config = AppConfig::load(cli.config.as_deref())?;

    if let Some(backend) = cli.backend {
        config.store.backend = backend;
    }
    if let Some(directory) = &cli.index_dir {
        config.store.persist_directory = directory.clone();
    }
    if let Some(snapshot) = &cli.snapshot {
        config.store.snapshot_path = Some(snapshot.clone());
    }
    if let Some(top_k) = cli.top_k {
        config.retrieval.top_k = top_k;
    }
    if cli.offline {
        config.embedding.provider = EmbeddingBackend::Hashing;
    }

    Ok(config)
}

fn build_embedder(
    config: &AppConfig,
    credentials: &Credentials,
) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    match config.embedding.provider {
        EmbeddingBackend::Hashing => Ok(Arc::new(HashingEmbedder {
            dimensions: config.embedding.hashing_dimensions,
        })),
        EmbeddingBackend::OpenAi => {
            let key = credentials.openai.clone().unwrap_or_default();
            Ok(Arc::new(OpenAiEmbedder::new(config.openai_embedder(key))?))
        }
    }
}

fn build_generator(
    config: &AppConfig,
    credentials: &Credentials,
) -> anyhow::Result<Arc<AnthropicGenerator>> {
    let key = credentials.anthropic.clone().unwrap_or_default();
    Ok(Arc::new(AnthropicGenerator::new(config.anthropic_generator(key))?))
}

async fn run_ingest(session: &mut ChatSession, inputs: &[PathBuf]) -> anyhow::Result<()> {
    let files = expand_pdf_inputs(inputs)?;
    info!(files = files.len(), "ingesting documents");

    for path in files {
        let status = ingest_path(session, &path).await;
        println!("{status}");
    }
    println!("📄 문서 처리가 완료되었습니다!");
    Ok(())
}

async fn ingest_path(session: &mut ChatSession, path: &Path) -> IngestStatus {
    match read_upload(path) {
        Ok(source) => session.ingest_source(source).await,
        Err(error) => IngestStatus::Failed {
            filename: path.display().to_string(),
            reason: error.to_string(),
        },
    }
}

async fn run_ask(session: &mut ChatSession, question: &str) {
    let answer = session.ask(question).await;
    println!("{}", answer.answer);

    if !answer.sources.is_empty() {
        println!();
        println!("📚 참고 출처");
        for (position, source) in answer.sources.iter().enumerate() {
            println!("{}. {source}", position + 1);
        }
    }
}

async fn print_stats(session: &ChatSession) -> anyhow::Result<()> {
    let stats = session
        .index_stats()
        .await
        .context("DB 상태 확인 실패")?;

    if stats.total_chunks == 0 {
        println!("아직 업로드된 문서가 없습니다.");
        return Ok(());
    }

    println!("총 저장된 청크: {}개", stats.total_chunks);
    println!("📊 파일별 청크 수:");
    for (filename, count) in stats.chunks_per_file {
        println!("  • {filename}: {count}개");
    }
    Ok(())
}

async fn run_reset(session: &mut ChatSession) {
    match session.reset_index().await {
        Ok(()) => println!("데이터베이스가 완전히 초기화되었습니다."),
        Err(error) => {
            eprintln!("데이터베이스 초기화 중 오류 발생: {error}");
            println!("세션 상태는 초기화되었습니다.");
        }
    }
}

async fn run_chat(
    session: &mut ChatSession,
    handle: &IndexHandle,
    credentials: &Credentials,
) -> anyhow::Result<()> {
    println!("팜소프트 cGMP 규정 챗봇");
    println!("cGMP 규정에 대해서 자세히 알려드립니다.");
    if credentials.langsmith_api_key.is_some() {
        let project = credentials.langsmith_project.as_deref().unwrap_or("default");
        println!("📊 LangSmith 프로젝트: {project}");
    }
    println!("명령어: /ingest <경로…>, /stats, /files, /clear, /reset, /history, /quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (command, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        match command {
            "/quit" | "/exit" => break,
            "/ingest" => {
                let paths = rest.split_whitespace().map(PathBuf::from).collect::<Vec<_>>();
                if paths.is_empty() {
                    println!("사용법: /ingest <파일 또는 폴더…>");
                    continue;
                }
                if let Err(error) = run_ingest(session, &paths).await {
                    println!("❌ {error}");
                }
                handle.persist().await?;
            }
            "/stats" => {
                if let Err(error) = print_stats(session).await {
                    println!("{error:#}");
                }
            }
            "/files" => {
                if session.processed_files().is_empty() {
                    println!("아직 업로드된 문서가 없습니다.");
                }
                for filename in session.processed_files() {
                    println!("✅ {filename}");
                }
            }
            "/clear" => {
                session.clear_history();
                println!("대화가 초기화되었습니다.");
            }
            "/reset" => {
                run_reset(session).await;
                handle.persist().await?;
            }
            "/history" => {
                for turn in session.history() {
                    println!("[{:?}] {}", turn.role, turn.content);
                }
            }
            _ => run_ask(session, line).await,
        }
    }

    Ok(())
}
