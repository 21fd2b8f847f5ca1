//! Face-aware region operations
//!
//! The `facedetect` binary prints one `x y w h` line per detected face.
//! Regions are recomputed on every request and never cached.

use crate::command::{CommandPipeline, ExternalCommand};
use crate::runner::{ProcessFailure, ProcessRunner};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Bounding box of a detected face (pixels)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRegion {
    /// Parse one detector line. Anything but exactly four whitespace
    /// separated non-negative integers yields `None`.
    pub fn parse_line(line: &str) -> Option<Self> {
        let mut fields = line.split_whitespace().map(|f| f.parse::<u32>().ok());
        let region = FaceRegion {
            x: fields.next()??,
            y: fields.next()??,
            width: fields.next()??,
            height: fields.next()??,
        };
        if fields.next().is_some() {
            return None;
        }
        Some(region)
    }

    /// ImageMagick geometry `WxH+X+Y`
    pub fn geometry(&self) -> String {
        format!("{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

/// Parse detector output, skipping malformed lines.
pub fn parse_regions<S: AsRef<str>>(lines: &[S]) -> Vec<FaceRegion> {
    lines
        .iter()
        .filter_map(|line| {
            let parsed = FaceRegion::parse_line(line.as_ref());
            if parsed.is_none() {
                tracing::debug!(line = %line.as_ref(), "Skipping malformed face detector line");
            }
            parsed
        })
        .collect()
}

pub struct FaceRegionProcessor {
    facedetect_path: PathBuf,
    convert_path: PathBuf,
    mogrify_path: PathBuf,
    runner: Arc<dyn ProcessRunner>,
}

impl FaceRegionProcessor {
    pub fn new(
        facedetect_path: impl Into<PathBuf>,
        convert_path: impl Into<PathBuf>,
        mogrify_path: impl Into<PathBuf>,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        Self {
            facedetect_path: facedetect_path.into(),
            convert_path: convert_path.into(),
            mogrify_path: mogrify_path.into(),
            runner,
        }
    }

    pub async fn detect(&self, file: &Path) -> Result<Vec<FaceRegion>, ProcessFailure> {
        let command = ExternalCommand::new(self.facedetect_path.to_string_lossy())
            .arg(file.to_string_lossy());
        let lines = self.runner.run(&CommandPipeline::single(command)).await?;
        Ok(parse_regions(&lines))
    }

    /// Crop the file in place to the face at `position`. Returns `false`
    /// without touching the file when there is no such face.
    pub async fn crop_to_face(&self, file: &Path, position: usize) -> Result<bool, ProcessFailure> {
        let regions = self.detect(file).await?;
        let Some(region) = regions.get(position) else {
            tracing::debug!(
                faces = regions.len(),
                position,
                "No face at requested position, skipping crop"
            );
            return Ok(false);
        };

        let path = file.to_string_lossy().into_owned();
        let command = ExternalCommand::new(self.convert_path.to_string_lossy())
            .arg(path.as_str())
            .arg("-crop")
            .arg(region.geometry())
            .arg("+repage")
            .arg(path.as_str());
        self.runner.run(&CommandPipeline::single(command)).await?;

        tracing::debug!(region = %region.geometry(), "Cropped to face");
        Ok(true)
    }

    /// Pixelate every detected face in place. Returns the number of faces.
    pub async fn blur_faces(&self, file: &Path) -> Result<usize, ProcessFailure> {
        let regions = self.detect(file).await?;
        let path = file.to_string_lossy().into_owned();

        for region in &regions {
            let command = ExternalCommand::new(self.mogrify_path.to_string_lossy())
                .args(["-gravity", "NorthWest", "-region"])
                .arg(region.geometry())
                .args(["-scale", "10%", "-scale", "1000%"])
                .arg(path.as_str());
            self.runner.run(&CommandPipeline::single(command)).await?;
        }

        tracing::debug!(faces = regions.len(), "Blurred faces");
        Ok(regions.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Answers facedetect with canned lines and records everything it runs.
    struct ScriptedRunner {
        detector_output: Vec<String>,
        calls: Mutex<Vec<ExternalCommand>>,
    }

    impl ScriptedRunner {
        fn new(detector_output: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                detector_output: detector_output.iter().map(|s| s.to_string()).collect(),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<ExternalCommand> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProcessRunner for ScriptedRunner {
        async fn run(&self, pipeline: &CommandPipeline) -> Result<Vec<String>, ProcessFailure> {
            let command = pipeline.stages[0].clone();
            let is_detector = command.program == "facedetect";
            self.calls.lock().unwrap().push(command);
            Ok(if is_detector {
                self.detector_output.clone()
            } else {
                Vec::new()
            })
        }
    }

    fn processor(runner: Arc<ScriptedRunner>) -> FaceRegionProcessor {
        FaceRegionProcessor::new("facedetect", "convert", "mogrify", runner)
    }

    #[test]
    fn test_parse_line() {
        assert_eq!(
            FaceRegion::parse_line("10 20 30 40"),
            Some(FaceRegion {
                x: 10,
                y: 20,
                width: 30,
                height: 40
            })
        );
        assert_eq!(FaceRegion::parse_line("  1\t2 3   4 ").map(|r| r.geometry()), Some("3x4+1+2".to_string()));
        assert_eq!(FaceRegion::parse_line("1 2 3"), None);
        assert_eq!(FaceRegion::parse_line("1 2 3 4 5"), None);
        assert_eq!(FaceRegion::parse_line("1 2 -3 4"), None);
        assert_eq!(FaceRegion::parse_line("a b c d"), None);
        assert_eq!(FaceRegion::parse_line(""), None);
    }

    #[test]
    fn test_parse_regions_skips_malformed() {
        let regions = parse_regions(&["1 1 5 5", "garbage", "2 2 6 6"]);
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[1].x, 2);
    }

    #[tokio::test]
    async fn test_crop_uses_indexed_region() {
        let runner = ScriptedRunner::new(&["0 0 10 10", "bad line", "50 60 70 80"]);
        let cropped = processor(runner.clone())
            .crop_to_face(Path::new("/tmp/in.jpg"), 1)
            .await
            .unwrap();
        assert!(cropped);

        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].program, "facedetect");
        assert_eq!(calls[0].args, vec!["/tmp/in.jpg"]);
        assert_eq!(calls[1].program, "convert");
        assert_eq!(
            calls[1].args,
            vec!["/tmp/in.jpg", "-crop", "70x80+50+60", "+repage", "/tmp/in.jpg"]
        );
    }

    #[tokio::test]
    async fn test_crop_missing_position_is_noop() {
        let runner = ScriptedRunner::new(&["0 0 10 10"]);
        let cropped = processor(runner.clone())
            .crop_to_face(Path::new("/tmp/in.jpg"), 3)
            .await
            .unwrap();
        assert!(!cropped);
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_blur_covers_every_region() {
        let runner = ScriptedRunner::new(&["0 0 10 10", "5 5 20 20", "9 9 1 1"]);
        let blurred = processor(runner.clone())
            .blur_faces(Path::new("/tmp/in.jpg"))
            .await
            .unwrap();
        assert_eq!(blurred, 3);

        let calls = runner.calls();
        let mogrify: Vec<&ExternalCommand> = calls.iter().filter(|c| c.program == "mogrify").collect();
        assert_eq!(mogrify.len(), 3);
        assert_eq!(
            mogrify[1].args,
            vec![
                "-gravity",
                "NorthWest",
                "-region",
                "20x20+5+5",
                "-scale",
                "10%",
                "-scale",
                "1000%",
                "/tmp/in.jpg"
            ]
        );
    }

    #[tokio::test]
    async fn test_blur_without_faces_is_noop() {
        let runner = ScriptedRunner::new(&[]);
        let blurred = processor(runner.clone())
            .blur_faces(Path::new("/tmp/in.jpg"))
            .await
            .unwrap();
        assert_eq!(blurred, 0);
        assert_eq!(runner.calls().len(), 1);
    }
}
