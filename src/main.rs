use anyhow::{Context, Result};
use clap::Parser;
use image::{DynamicImage, ImageReader};
use log::info;
use std::path::Path;

use omr_prep::{
    encode_png_base64, export_results_to, find_sheet_contour, load_results, perspective_crop,
    rotate_image, threshold, Cli, Command,
};

fn open_image(path: &Path) -> Result<DynamicImage> {
    let img = ImageReader::open(path)
        .with_context(|| format!("Failed to open input file: {:?}", path))?
        .decode()
        .with_context(|| format!("Failed to decode image: {:?}", path))?;

    info!("Loaded image: {:?} ({}x{})", path, img.width(), img.height());
    Ok(img)
}

fn save_image(img: &DynamicImage, path: &Path) -> Result<()> {
    img.save(path)
        .with_context(|| format!("Failed to save output: {:?}", path))?;
    info!("Saved {:?} ({}x{})", path, img.width(), img.height());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match cli.command {
        Command::Threshold(args) => {
            let img = open_image(&args.input)?;
            let binary = threshold(&img);
            save_image(&DynamicImage::ImageLuma8(binary), &args.output_path("threshold"))?;
        }
        Command::Crop(args) => {
            let img = open_image(&args.input)?;
            let binary = threshold(&img);
            let contour = find_sheet_contour(&binary)
                .with_context(|| format!("No quadrilateral outline found in {:?}", args.input))?;
            let cropped = perspective_crop(&contour, &img)?;
            save_image(&cropped, &args.output_path("cropped"))?;
        }
        Command::Rotate { image, angle } => {
            let img = open_image(&image.input)?;
            let rotated = rotate_image(&img.to_rgba8(), angle);
            save_image(&DynamicImage::ImageRgba8(rotated), &image.output_path("rotated"))?;
        }
        Command::Encode { input } => {
            let img = open_image(&input)?;
            if let Some(text) = encode_png_base64(Some(&img))? {
                println!("{}", text);
            }
        }
        Command::Export(args) => {
            let records = load_results(&args.input)?;
            export_results_to(&args.output, &records, &args.layout())?;
            info!("Exported {} results to {:?}", records.len(), args.output);
        }
    }

    Ok(())
}
