//! ImageMagick command construction
//!
//! `CommandBuilder` turns an option set into a `CommandPipeline`. The main
//! `convert` invocation is assembled stage by stage: source, resize
//! geometry, thread limit and strip, pass-through flags, then the codec
//! tail. When mozjpeg is usable for a JPEG output, `convert` writes TGA to
//! stdout and a second `cjpeg` stage encodes it.

use crate::format::ImageFormat;
use crate::geometry::Geometry;
use crate::options::{OptionClaims, OptionSet};
use std::fmt;
use std::path::{Path, PathBuf};

/// Options consumed outside the `convert` argument list.
const CONSUMED_ELSEWHERE: &[&str] = &[
    "output",
    "refresh",
    "face-crop",
    "face-crop-position",
    "face-blur",
];

/// A program and its argument vector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ExternalCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for ExternalCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Commands whose stdout feeds the next command's stdin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPipeline {
    pub stages: Vec<ExternalCommand>,
}

impl CommandPipeline {
    pub fn single(command: ExternalCommand) -> Self {
        Self {
            stages: vec![command],
        }
    }
}

impl fmt::Display for CommandPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, stage) in self.stages.iter().enumerate() {
            if index > 0 {
                write!(f, " | ")?;
            }
            write!(f, "{}", stage)?;
        }
        Ok(())
    }
}

/// Per-request inputs to command construction
#[derive(Debug, Clone)]
pub struct BuildTarget<'a> {
    pub source: &'a Path,
    pub output: &'a Path,
    pub input_format: ImageFormat,
    pub output_format: ImageFormat,
    /// Path of a usable `cjpeg`, if any
    pub mozjpeg: Option<&'a Path>,
}

#[derive(Debug, Clone)]
pub struct CommandBuilder {
    convert_path: PathBuf,
}

impl CommandBuilder {
    pub fn new(convert_path: impl Into<PathBuf>) -> Self {
        Self {
            convert_path: convert_path.into(),
        }
    }

    /// Build the conversion pipeline. Pure: same inputs, same pipeline.
    pub fn build(&self, options: &OptionSet, target: &BuildTarget<'_>) -> CommandPipeline {
        let mut claims = options.claims();
        let mut convert = ExternalCommand::new(self.convert_path.to_string_lossy());

        convert = convert.arg(Self::source_arg(&mut claims, target));
        convert = Self::geometry_stage(convert, &mut claims);
        convert = Self::thread_and_strip_stage(convert, &mut claims);

        // Claimed up front so neither the pass-through nor the codec stage
        // sees them as flags.
        for name in CONSUMED_ELSEWHERE {
            claims.claim(name);
        }
        let quality = claims.claim("quality");
        let use_mozjpeg = claims.claim_truthy("mozjpeg")
            && target.output_format == ImageFormat::Jpeg
            && target.mozjpeg.is_some();
        let webp_lossless = claims.claim_truthy("webp-lossless");

        for (name, value) in claims.remaining() {
            convert = convert.arg(format!("-{}", name)).arg(value);
        }

        match target.mozjpeg {
            Some(cjpeg) if use_mozjpeg => {
                convert = convert.arg("tga:-");
                let encoder = ExternalCommand::new(cjpeg.to_string_lossy())
                    .args(["-quality", quality])
                    .arg("-outfile")
                    .arg(target.output.to_string_lossy())
                    .arg("-targa");
                CommandPipeline {
                    stages: vec![convert, encoder],
                }
            }
            _ => {
                convert = convert.args(["-quality", quality]);
                if webp_lossless && target.output_format == ImageFormat::WebP {
                    convert = convert.args(["-define", "webp:lossless=true"]);
                }
                convert = convert.arg(target.output.to_string_lossy());
                CommandPipeline::single(convert)
            }
        }
    }

    fn source_arg(claims: &mut OptionClaims<'_>, target: &BuildTarget<'_>) -> String {
        let frame = claims.claim("gif-frame");
        let source = target.source.to_string_lossy();
        if target.input_format == ImageFormat::Gif && !frame.is_empty() {
            format!("{}[{}]", source, frame)
        } else {
            source.into_owned()
        }
    }

    fn geometry_stage(mut convert: ExternalCommand, claims: &mut OptionClaims<'_>) -> ExternalCommand {
        let geometry = Geometry::from_claims(claims);
        let operator = if claims.claim_truthy("resize") {
            "-resize"
        } else {
            "-thumbnail"
        };

        if let Some(size) = geometry.size {
            convert = convert.arg(operator).arg(size);
        }
        if let Some(gravity) = geometry.gravity {
            convert = convert.arg("-gravity").arg(gravity);
        }
        if let Some(extent) = geometry.extent {
            convert = convert.args(extent.to_args());
        }
        convert
    }

    fn thread_and_strip_stage(
        mut convert: ExternalCommand,
        claims: &mut OptionClaims<'_>,
    ) -> ExternalCommand {
        let thread = claims.claim("thread");
        if !thread.is_empty() {
            convert = convert.args(["-limit", "thread", thread]);
        }
        if claims.claim_truthy("strip") {
            convert = convert.arg("-strip");
        }
        convert
    }
}
