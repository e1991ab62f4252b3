//! Reenlazado de modelos perdidos en workflows de grafos de nodos.
//!
//! El núcleo (`matcher`, `workflow_analyzer`, `workflow_updater`, `linker`)
//! es síncrono y no guarda estado entre llamadas; `api` lo expone por HTTP.

pub mod api;
pub mod app_state;
pub mod config;
pub mod inventory;
pub mod linker;
pub mod matcher;
pub mod models;
pub mod workflow_analyzer;
pub mod workflow_updater;
