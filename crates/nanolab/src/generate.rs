// SPDX-FileCopyrightText: 2026 Nanolab Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `nanolab generate` command implementation.
//!
//! Runs one generation (or a batch) through the full pipeline: session
//! single-flight, trial quota, retries and refunds.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use nanolab_agent::{GenerationJob, GenerationPipeline, GenerationSession};
use nanolab_config::NanolabConfig;
use nanolab_core::{
    BlendRequest, GenerateRequest, GeneratedImage, GenerationResult, NanolabError, SearchRequest,
    SessionId,
};
use tracing::info;

use crate::GenerateArgs;
use crate::runtime;

/// Run `nanolab generate`.
pub async fn run_generate(config: &NanolabConfig, args: GenerateArgs) -> Result<(), NanolabError> {
    let client = runtime::gemini_client(config, args.api_key.as_deref())?;
    let clock = runtime::clock();
    let quota = runtime::open_quota(config, clock.clone())?;

    let session = GenerationSession::from_config(
        SessionId(uuid::Uuid::new_v4().to_string()),
        config,
        args.api_key.as_deref(),
        clock,
    );
    let pipeline = GenerationPipeline::from_config(Arc::new(client), quota, config);
    let job = build_job(config, &args).await?;

    info!(
        session = %session.id().0,
        trial = session.is_trial(),
        count = args.count,
        "running generation"
    );
    let results = if args.count > 1 {
        pipeline
            .run_batch(&session, job, args.count, args.parallel)
            .await?
    } else {
        vec![pipeline.run(&session, job).await?]
    };

    let total = results.len();
    let mut saved = 0;
    for (index, result) in results.iter().enumerate() {
        report_text(result);
        match &result.image {
            Some(image) => {
                let path = output_path(&args.out, index, total);
                write_image(&path, image).await?;
                println!(
                    "Saved {} ({}, {} bytes, {:.1}s)",
                    path.display(),
                    image.mime_type,
                    image.data.len(),
                    result.duration.as_secs_f64()
                );
                saved += 1;
            }
            None => {
                let error = result.error.as_deref().unwrap_or("no image returned");
                eprintln!("Item {}: {error}", index + 1);
            }
        }
    }

    if saved > 0 {
        return Ok(());
    }
    match results.first() {
        Some(result) if result.safety_blocked => Err(NanolabError::SafetyBlocked(
            result.error.clone().unwrap_or_default(),
        )),
        Some(result) => Err(NanolabError::provider(
            result
                .error
                .clone()
                .unwrap_or_else(|| "no image returned".to_string()),
        )),
        None => Err(NanolabError::Internal("generation was cancelled".to_string())),
    }
}

async fn build_job(config: &NanolabConfig, args: &GenerateArgs) -> Result<GenerationJob, NanolabError> {
    let aspect_ratio = args
        .aspect_ratio
        .clone()
        .unwrap_or_else(|| config.gemini.default_aspect_ratio.clone());
    let safety_level = args.safety.unwrap_or(config.gemini.safety_level);

    if !args.image.is_empty() {
        let mut images = Vec::with_capacity(args.image.len());
        for path in &args.image {
            images.push(read_image(path).await?);
        }
        return Ok(GenerationJob::blend(BlendRequest {
            prompt: args.prompt.clone(),
            images,
            aspect_ratio,
            safety_level,
        }));
    }

    if args.search {
        return Ok(GenerationJob::search(SearchRequest {
            prompt: args.prompt.clone(),
            aspect_ratio,
            safety_level,
        }));
    }

    Ok(GenerationJob::generate(
        args.mode,
        GenerateRequest {
            prompt: args.prompt.clone(),
            aspect_ratio,
            resolution: args.resolution.clone(),
            enable_thinking: args.thinking,
            enable_search: false,
            safety_level,
        },
    ))
}

fn report_text(result: &GenerationResult) {
    if let Some(thinking) = &result.thinking {
        println!("Thinking: {thinking}");
    }
    if let Some(text) = &result.text {
        println!("{text}");
    }
    if let Some(sources) = &result.search_sources {
        println!("Sources: {sources}");
    }
}

/// `out` for a single image; `out` with `-<n>` before the extension inside
/// a batch.
fn output_path(out: &Path, index: usize, total: usize) -> PathBuf {
    if total <= 1 {
        return out.to_path_buf();
    }
    let stem = out
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    let name = match out.extension() {
        Some(ext) => format!("{stem}-{}.{}", index + 1, ext.to_string_lossy()),
        None => format!("{stem}-{}", index + 1),
    };
    out.with_file_name(name)
}

fn mime_for(path: &Path) -> Result<&'static str, NanolabError> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Ok("image/png"),
        "jpg" | "jpeg" => Ok("image/jpeg"),
        "webp" => Ok("image/webp"),
        _ => Err(NanolabError::InvalidInput(format!(
            "unsupported image type: {}",
            path.display()
        ))),
    }
}

async fn read_image(path: &Path) -> Result<GeneratedImage, NanolabError> {
    let mime_type = mime_for(path)?;
    let data = tokio::fs::read(path).await.map_err(|e| {
        NanolabError::InvalidInput(format!("cannot read {}: {e}", path.display()))
    })?;
    Ok(GeneratedImage {
        mime_type: mime_type.to_string(),
        data,
    })
}

async fn write_image(path: &Path, image: &GeneratedImage) -> Result<(), NanolabError> {
    tokio::fs::write(path, &image.data)
        .await
        .map_err(|e| NanolabError::Internal(format!("cannot write {}: {e}", path.display())))
}
