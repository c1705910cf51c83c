use crate::alignment::{align_channels, Aligner, AlignmentOutcome};
use crate::archive::FrameArchive;
use crate::cache_key::{derive_key, CacheKey};
use crate::conversion::{check_inputs, Converter};
use crate::error::Result;
use crate::frame::{FrameDescriptor, FrameRef, ThumbnailParams};
use crate::object_store::ThumbnailStore;
use crate::resolver::resolve_channels;
use crate::validator::FrameValidator;
use crate::workspace::Workspace;
use futures::future::try_join_all;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// A thumbnail ready to be served
#[derive(Debug, Clone, PartialEq)]
pub struct Thumbnail {
    /// Presigned GET URL of the JPEG
    pub url: String,
    /// Proposal of the source frame
    pub propid: Option<String>,
    /// Object key the JPEG is stored under
    pub key: CacheKey,
    /// Whether the JPEG already existed
    pub cache_hit: bool,
}

/// Runs one thumbnail request end to end
///
/// validate → derive key → cache gate → (colour: resolve channels) → download
/// → (colour: align) → convert → upload → sign. Every temp file lives in a
/// [`Workspace`] that is released on every exit path.
pub struct ThumbnailPipeline {
    archive: Arc<dyn FrameArchive>,
    store: ThumbnailStore,
    converter: Arc<dyn Converter>,
    aligner: Option<Arc<dyn Aligner>>,
    validator: FrameValidator,
    tmp_dir: PathBuf,
}

impl ThumbnailPipeline {
    pub fn new(
        archive: Arc<dyn FrameArchive>,
        store: ThumbnailStore,
        converter: Arc<dyn Converter>,
        aligner: Option<Arc<dyn Aligner>>,
        validator: FrameValidator,
        tmp_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            archive,
            store,
            converter,
            aligner,
            validator,
            tmp_dir: tmp_dir.into(),
        }
    }

    /// Look up the frame addressed by the request path
    pub async fn lookup(&self, frame_ref: &FrameRef, auth: Option<&str>) -> Result<FrameDescriptor> {
        match frame_ref {
            FrameRef::Id(id) => self.archive.frame(*id, auth).await,
            FrameRef::Basename(name) => self.archive.frame_by_basename(name, auth).await,
        }
    }

    /// Return a URL for the thumbnail of `frame`, rendering it if needed
    #[instrument(skip(self, frame, auth), fields(frame_id = frame.id))]
    pub async fn thumbnail(
        &self,
        frame: &FrameDescriptor,
        params: &ThumbnailParams,
        auth: Option<&str>,
    ) -> Result<Thumbnail> {
        self.validator.validate(frame, params).into_result()?;

        let key = derive_key(frame.id, params);
        let cache_hit = self.store.exists(&key).await?;

        if cache_hit {
            debug!(key = %key, "Thumbnail already stored");
            metrics::counter!("thumbnail_cache_hits_total").increment(1);
        } else {
            let mut workspace = Workspace::new(&self.tmp_dir);
            let result = self.generate(frame, params, &key, auth, &mut workspace).await;
            workspace.release_async().await;
            result?;
            info!(key = %key, color = params.color, "Thumbnail generated");
        }

        let signed = self.store.sign_url(&key).await?;
        Ok(Thumbnail {
            url: signed.url,
            propid: frame.proposal_id.clone(),
            key,
            cache_hit,
        })
    }

    async fn generate(
        &self,
        frame: &FrameDescriptor,
        params: &ThumbnailParams,
        key: &CacheKey,
        auth: Option<&str>,
        workspace: &mut Workspace,
    ) -> Result<()> {
        workspace.prepare().await?;

        let frames = match (params.color, frame.request_id()) {
            (true, Some(request_id)) => {
                resolve_channels(self.archive.as_ref(), request_id, auth).await?
            }
            _ => vec![frame.clone()],
        };

        // Paths are tracked before any byte is written
        let paths: Vec<PathBuf> = frames
            .iter()
            .map(|f| workspace.allocate(&f.local_name()))
            .collect();
        try_join_all(
            frames
                .iter()
                .zip(&paths)
                .map(|(f, path)| self.archive.download(f, path)),
        )
        .await?;
        workspace.set_current(paths);

        if params.color {
            if let Some(aligner) = &self.aligner {
                if let AlignmentOutcome::Aligned(paths) =
                    align_channels(aligner.as_ref(), workspace).await
                {
                    workspace.set_current(paths);
                }
            }
        }

        let output = workspace.allocate(key.as_str());
        let inputs = workspace.current().to_vec();
        check_inputs(&inputs, params)?;
        self.converter.convert(&inputs, &output, params).await?;

        self.store.upload(key, &output).await?;
        Ok(())
    }
}
