use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use retouch_contracts::errors::RemoteFailure;

use crate::client::{source_base64, ClientResult, GenerationClient, JobHandle, PollStatus};

pub const DRYRUN_VIDEO_SCHEME: &str = "dryrun://video/";

/// Offline client: edits echo the source image, animations finish after a
/// fixed number of polls and fetch a small placeholder blob.
#[derive(Debug)]
pub struct DryrunClient {
    polls_until_done: u32,
    next_job: AtomicU64,
    jobs: Mutex<HashMap<String, u32>>,
}

impl Default for DryrunClient {
    fn default() -> Self {
        Self::new(2)
    }
}

impl DryrunClient {
    pub fn new(polls_until_done: u32) -> Self {
        Self {
            polls_until_done,
            next_job: AtomicU64::new(1),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    fn placeholder_video(job_name: &str) -> Vec<u8> {
        // ftyp box so the file sniffs as MP4.
        let mut bytes = vec![0, 0, 0, 0x18];
        bytes.extend_from_slice(b"ftypisom");
        bytes.extend_from_slice(&[0, 0, 0x02, 0]);
        bytes.extend_from_slice(b"isomiso2");
        bytes.extend_from_slice(job_name.as_bytes());
        bytes
    }
}

impl GenerationClient for DryrunClient {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn edit(&self, payload: &str, _media_type: &str, instruction: &str) -> ClientResult<String> {
        if instruction.trim().is_empty() {
            return Err(RemoteFailure::remote("dryrun edit requires an instruction"));
        }
        source_base64(payload)
    }

    fn animate_submit(
        &self,
        payload: &str,
        _media_type: &str,
        _instruction: &str,
    ) -> ClientResult<JobHandle> {
        source_base64(payload)?;
        let id = self.next_job.fetch_add(1, Ordering::SeqCst);
        let name = format!("dryrun-op-{id}");
        let mut jobs = self
            .jobs
            .lock()
            .map_err(|_| RemoteFailure::remote("dryrun job table poisoned"))?;
        jobs.insert(name.clone(), 0);
        Ok(JobHandle(name))
    }

    fn animate_poll(&self, job: &JobHandle) -> ClientResult<PollStatus> {
        let mut jobs = self
            .jobs
            .lock()
            .map_err(|_| RemoteFailure::remote("dryrun job table poisoned"))?;
        let Some(polls) = jobs.get_mut(job.as_str()) else {
            return Err(RemoteFailure::remote(format!(
                "unknown dryrun operation: {}",
                job.as_str()
            ))
            .with_status(404));
        };
        *polls += 1;
        if *polls < self.polls_until_done {
            return Ok(PollStatus::pending());
        }
        jobs.remove(job.as_str());
        Ok(PollStatus::finished(format!(
            "{DRYRUN_VIDEO_SCHEME}{}",
            job.as_str()
        )))
    }

    fn fetch_artifact(&self, uri: &str) -> ClientResult<Vec<u8>> {
        let job_name = uri.strip_prefix(DRYRUN_VIDEO_SCHEME).ok_or_else(|| {
            RemoteFailure::remote(format!("Failed to download video (404): {uri}")).with_status(404)
        })?;
        Ok(Self::placeholder_video(job_name))
    }
}

#[cfg(test)]
mod tests {
    use retouch_contracts::errors::FailureKind;

    use super::*;

    #[test]
    fn edit_echoes_validated_payload() {
        let client = DryrunClient::default();
        assert_eq!(
            client
                .edit("data:image/png;base64,AAEC", "image/png", "sharpen")
                .unwrap(),
            "AAEC"
        );
        assert_eq!(
            client.edit("???", "image/png", "sharpen").unwrap_err().kind,
            FailureKind::InvalidInput
        );
    }

    #[test]
    fn animation_finishes_after_configured_polls() {
        let client = DryrunClient::new(3);
        let job = client.animate_submit("AAEC", "image/png", "zoom").unwrap();
        assert_eq!(job.as_str(), "dryrun-op-1");
        assert!(!client.animate_poll(&job).unwrap().done);
        assert!(!client.animate_poll(&job).unwrap().done);
        let status = client.animate_poll(&job).unwrap();
        assert_eq!(status, PollStatus::finished("dryrun://video/dryrun-op-1"));
        assert!(client.jobs.lock().unwrap().is_empty());
        assert_eq!(client.animate_poll(&job).unwrap_err().status, Some(404));

        let bytes = client
            .fetch_artifact(status.artifact_uri.as_deref().unwrap_or_default())
            .unwrap();
        assert_eq!(&bytes[4..8], b"ftyp");
    }

    #[test]
    fn unknown_job_and_uri_fail() {
        let client = DryrunClient::default();
        let err = client
            .animate_poll(&JobHandle("missing".to_string()))
            .unwrap_err();
        assert_eq!(err.status, Some(404));
        assert!(client.fetch_artifact("https://elsewhere/video.mp4").is_err());
    }
}
