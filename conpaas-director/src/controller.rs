// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! The contract with the cloud controller that starts and stops manager instances.
//!
//! The controller itself lives outside this crate. It only needs to expose the operations
//! below; the director never reaches into its internals.

/// A virtual machine started by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    /// The controller's identifier for the instance.
    pub id: String,
    /// The instance's network address, if it has reported one yet.
    pub address: Option<String>,
}

/// Operations the director needs from a cloud controller.
#[allow(async_fn_in_trait)]
pub trait CloudController {
    /// The driver name of the cloud new instances are created on.
    ///
    /// This selects the cloud bootstrap script and connection configuration.
    fn current_cloud(&self) -> &str;

    /// Create an instance that runs `context` when it boots.
    async fn create_instance(&self, context: String) -> anyhow::Result<Instance>;

    /// Terminate the instance with the given identifier.
    async fn kill_instance(&self, instance_id: &str) -> anyhow::Result<()>;

    /// Stop any background work (reservation timers and the like) so the controller can be
    /// dropped.
    async fn shutdown(&self);
}

/// Terminate a manager instance and shut the controller down.
///
/// The controller is shut down even if terminating the instance fails.
#[tracing::instrument(skip(controller), err)]
pub async fn stop_manager<C: CloudController>(
    controller: &C,
    instance_id: &str,
) -> Result<(), crate::Error> {
    let result = controller.kill_instance(instance_id).await;
    controller.shutdown().await;
    result.inspect(|_| tracing::info!("Manager instance terminated"))?;
    Ok(())
}
