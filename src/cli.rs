use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::export::{SheetLayout, DEFAULT_OUTPUT};

#[derive(Parser, Debug)]
#[command(name = "omr-prep")]
#[command(version, about = "Prepare scanned answer sheets for grading and export graded results")]
pub struct Cli {
    /// Show processing details
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Blur and binarize an image (marks become white)
    Threshold(ImageArgs),

    /// Find the sheet outline and flatten it to an upright rectangle
    Crop(ImageArgs),

    /// Rotate an image without cropping any of it
    Rotate {
        #[command(flatten)]
        image: ImageArgs,

        /// Rotation in degrees, positive is counter-clockwise
        #[arg(short, long, allow_hyphen_values = true)]
        angle: f64,
    },

    /// Print an image as base64-encoded PNG
    Encode {
        /// Input image path
        input: PathBuf,
    },

    /// Write graded results (JSON array) to a spreadsheet
    Export(ExportArgs),
}

#[derive(Args, Debug)]
pub struct ImageArgs {
    /// Input image path
    pub input: PathBuf,

    /// Output path [default: input_<operation>.png]
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl ImageArgs {
    pub fn output_path(&self, suffix: &str) -> PathBuf {
        self.output.clone().unwrap_or_else(|| {
            let stem = self.input.file_stem().unwrap_or_default().to_string_lossy();
            let parent = self.input.parent().unwrap_or(Path::new("."));
            parent.join(format!("{}_{}.png", stem, suffix))
        })
    }
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Graded results JSON file
    pub input: PathBuf,

    /// Output workbook
    #[arg(short, long, default_value = DEFAULT_OUTPUT)]
    pub output: PathBuf,

    /// Row holding the student id
    #[arg(long, default_value_t = SheetLayout::default().id_row)]
    pub id_row: u32,

    /// First row of bubbled answers
    #[arg(long, default_value_t = SheetLayout::default().answer_row)]
    pub answer_row: u32,

    /// First row of unsure markers
    #[arg(long, default_value_t = SheetLayout::default().unsure_row)]
    pub unsure_row: u32,

    /// First row of error markers
    #[arg(long, default_value_t = SheetLayout::default().error_row)]
    pub error_row: u32,
}

impl ExportArgs {
    pub fn layout(&self) -> SheetLayout {
        SheetLayout {
            id_row: self.id_row,
            answer_row: self.answer_row,
            unsure_row: self.unsure_row,
            error_row: self.error_row,
        }
    }
}
