/*!
Command dispatcher module.

Each subcommand lives in its own file and exposes exactly one public
`execute_*` function taking its clap `Args` struct plus the shared
[`Session`](shared::Session), returning `anyhow::Result<()>`.

Layout:
  src/cmd/
    mod.rs      (this file)
    shared.rs   (Session + attribute helpers)
    format.rs   (YAML / side-stream rendering)
    get.rs      ordered fetch by id
    list.rs     paginated listing
    delete.rs   delete by id
    patch.rs    patch attributes by id
    create.rs   create from JSON/YAML files
    wait.rs     poll analyses until completed

Batch commands (`delete`, `patch`, `create`, `wait`) run on the worker
pool and print one line per item in completion order; `get` runs the
ordered fetch and prints in argument order.
*/

pub mod create;
pub mod delete;
pub mod format;
pub mod get;
pub mod list;
pub mod patch;
pub mod shared;
pub mod wait;

pub use create::{CreateArgs, execute_create};
pub use delete::{DeleteArgs, execute_delete};
pub use get::{GetArgs, execute_get};
pub use list::{ListArgs, execute_list};
pub use patch::{PatchArgs, execute_patch};
pub use shared::Session;
pub use wait::{WaitArgs, execute_wait};
