use crate::error::ProviderError;
use crate::generation::TextGenerator;
use crate::models::{Answer, ScoredChunk};
use tracing::debug;

pub const NO_RELEVANT_INFORMATION: &str = "죄송합니다. 업로드된 문서에서 관련 정보를 찾을 수 없습니다. 문서가 올바르게 업로드되었는지 확인해주세요.";

const UNKNOWN_SOURCE: &str = "알 수 없음";

const PROMPT_TEMPLATE: &str = "
    당신은 cGMP 규정 전문가입니다. 다음 문서들을 바탕으로 질문에 정확하고 상세하게 답변해주세요.

    문서 내용:
    {context}

    질문: {question}

    답변 시 다음 사항을 준수해주세요:
    1. 제공된 문서 내용만을 바탕으로 답변하세요
    2. 구체적이고 실용적인 정보를 포함하세요
    3. 단계별 절차가 있다면 순서대로 설명하세요
    4. 문서에 없는 내용은 추측하지 마세요

    답변:
    ";

pub fn search_failure_answer(reason: &str) -> Answer {
    Answer {
        answer: format!(
            "문서 검색 중 오류가 발생했습니다: {reason}\n\n데이터베이스를 초기화하고 다시 시도해주세요."
        ),
        sources: Vec::new(),
    }
}

pub fn generation_failure_answer(reason: &str) -> Answer {
    Answer {
        answer: format!("답변 생성 중 오류가 발생했습니다: {reason}"),
        sources: Vec::new(),
    }
}

/// `[문서: source]` blocks in retrieval order.
pub fn build_context(chunks: &[ScoredChunk]) -> String {
    chunks
        .iter()
        .map(|hit| {
            let source = non_empty(&hit.chunk.metadata.source).unwrap_or(UNKNOWN_SOURCE);
            format!("[문서: {source}]\n{}", hit.chunk.text)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Unique citations in first-retrieval order.
pub fn collect_citations(chunks: &[ScoredChunk]) -> Vec<String> {
    let mut citations: Vec<String> = Vec::new();
    for hit in chunks {
        let source = non_empty(&hit.chunk.metadata.source).unwrap_or(UNKNOWN_SOURCE);
        let citation = match hit.chunk.metadata.page {
            Some(page) if page > 0 => format!("{source} (페이지 {page})"),
            _ => source.to_string(),
        };
        if !citations.contains(&citation) {
            citations.push(citation);
        }
    }
    citations
}

pub fn render_prompt(context: &str, question: &str) -> String {
    PROMPT_TEMPLATE
        .replace("{context}", context)
        .replace("{question}", question)
}

/// Builds the grounded prompt and asks the generator. An empty retrieval
/// answers with [`NO_RELEVANT_INFORMATION`] without calling the model.
pub async fn synthesize(
    generator: &dyn TextGenerator,
    question: &str,
    chunks: &[ScoredChunk],
) -> Result<Answer, ProviderError> {
    if chunks.is_empty() {
        return Ok(Answer {
            answer: NO_RELEVANT_INFORMATION.to_string(),
            sources: Vec::new(),
        });
    }

    let context = build_context(chunks);
    let prompt = render_prompt(&context, question);
    debug!(chunks = chunks.len(), context_chars = context.chars().count(), "synthesizing answer");

    let answer = generator.generate(&prompt).await?;
    Ok(Answer {
        answer,
        sources: collect_citations(chunks),
    })
}

fn non_empty(value: &str) -> Option<&str> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}
