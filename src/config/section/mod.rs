//! Configuration section definitions.
//!
//! Each module corresponds to a section in `hotview.toml`:
//!
//! | Module      | TOML Section   | Purpose                                  |
//! |-------------|----------------|------------------------------------------|
//! | `serve`     | `[serve]`      | Development-host listener                |
//! | `device`    | `[device]`     | Packaged host endpoint read by devices   |
//! | `synth`     | `[synth]`      | Class synthesis and loader rewriting     |
//! | `style`     | `[style]`      | Stylesheet lookup                        |
//! | `session`   | `[session]`    | View registry bounds                     |
//! | `evaluator` | `[evaluator]`  | Device-side evaluator command            |

mod device;
mod evaluator;
mod serve;
mod session;
mod style;
mod synth;

pub use device::{DeviceConfig, DeviceEndpoint, ReconnectPolicy};
pub use evaluator::EvaluatorConfig;
pub use serve::ServeConfig;
pub use session::SessionConfig;
pub use style::StyleConfig;
pub use synth::SynthConfig;
