pub mod cli;
pub mod detection;
pub mod encode;
pub mod export;
pub mod geometry;
pub mod transform;

pub use cli::{Cli, Command};
pub use detection::{find_sheet_contour, threshold};
pub use encode::encode_png_base64;
pub use export::{
    export_results, export_results_to, load_results, plan_cells, ResultRecord, SheetLayout,
};
pub use geometry::{rotation_canvas, rotation_matrix};
pub use transform::{perspective_crop, rotate_image};
