//! OS service integration.
//!
//! On Windows the supervisor runs under the service control manager: the
//! dispatcher drives `Stopped → StartPending → Running → StopPending →
//! Stopped`, Stop and Shutdown wind the supervisor down, and
//! Pause/Continue/Interrogate are accepted no-ops. On Unix the same
//! supervisor runs in the foreground with SIGTERM/SIGINT playing the role
//! of the Stop opcode; the install/uninstall surface reports unsupported.

use std::sync::Arc;

use crate::error::Result;
use crate::supervisor::Supervisor;

#[cfg(unix)]
mod platform {
    use super::*;
    use crate::error::Error;
    use crate::log_debug;

    /// Run the supervisor in the foreground until a stop signal arrives.
    pub fn dispatch(supervisor: Arc<Supervisor>) -> Result<i32> {
        use signal_hook::consts::{SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let mut signals = Signals::new([SIGTERM, SIGINT])
            .map_err(|e| Error::Service(format!("failed to install signal handlers: {e}")))?;

        let stopper = Arc::clone(&supervisor);
        std::thread::Builder::new()
            .name("signal-handler".into())
            .spawn(move || {
                if signals.forever().next().is_some() {
                    log_debug!("stop signal received");
                    stopper.request_stop();
                }
            })
            .map_err(|e| Error::Service(format!("failed to spawn signal thread: {e}")))?;

        supervisor.start_running();
        supervisor.run();
        Ok(supervisor.exit_code())
    }

    pub fn is_installed(_supervisor: &Supervisor) -> Result<bool> {
        Err(unsupported())
    }

    pub fn install(_supervisor: &Supervisor) -> Result<()> {
        Err(unsupported())
    }

    pub fn uninstall(_supervisor: &Supervisor) -> Result<()> {
        Err(unsupported())
    }

    fn unsupported() -> Error {
        Error::Service("service records are only supported on Windows; run in the foreground".into())
    }
}

#[cfg(windows)]
mod platform {
    use super::*;
    use std::ffi::OsString;
    use std::time::Duration;

    use parking_lot::Mutex;
    use windows_service::service::{
        ServiceAccess, ServiceControl, ServiceControlAccept, ServiceErrorControl, ServiceExitCode,
        ServiceInfo, ServiceStartType, ServiceState, ServiceStatus, ServiceType,
    };
    use windows_service::service_control_handler::{self, ServiceControlHandlerResult};
    use windows_service::service_manager::{ServiceManager, ServiceManagerAccess};
    use windows_service::{define_windows_service, service_dispatcher};

    use crate::error::Error;
    use crate::{log_debug, log_error, log_info};

    /// The instance the service entry point binds to. The dispatcher
    /// callback carries no user data, so this is the bridge.
    static ACTIVE: Mutex<Option<Arc<Supervisor>>> = Mutex::new(None);

    define_windows_service!(ffi_service_main, service_main);

    fn service_main(_arguments: Vec<OsString>) {
        let Some(supervisor) = ACTIVE.lock().clone() else {
            return;
        };

        let control = Arc::clone(&supervisor);
        let handler = move |event: ServiceControl| match event {
            ServiceControl::Stop | ServiceControl::Shutdown => {
                control.request_stop();
                ServiceControlHandlerResult::NoError
            }
            ServiceControl::Interrogate | ServiceControl::Pause | ServiceControl::Continue => {
                log_debug!("doing nothing");
                ServiceControlHandlerResult::NoError
            }
            ServiceControl::UserEvent(code) => {
                log_debug!("user control code {}", code.to_raw());
                ServiceControlHandlerResult::NoError
            }
            _ => ServiceControlHandlerResult::NotImplemented,
        };

        let status_handle =
            match service_control_handler::register(supervisor.service_name(), handler) {
                Ok(handle) => handle,
                Err(e) => {
                    log_error!("failed to register the service control handler: {e}");
                    return;
                }
            };

        let set_status = |state: ServiceState, accepts: ServiceControlAccept, exit_code: u32| {
            let status = ServiceStatus {
                service_type: ServiceType::OWN_PROCESS,
                current_state: state,
                controls_accepted: accepts,
                exit_code: ServiceExitCode::Win32(exit_code),
                checkpoint: 0,
                wait_hint: Duration::default(),
                process_id: None,
            };
            if let Err(e) = status_handle.set_service_status(status) {
                log_error!("SetServiceStatus failed: {e}");
            }
        };

        set_status(ServiceState::StartPending, ServiceControlAccept::empty(), 0);

        supervisor.start_running();
        set_status(
            ServiceState::Running,
            ServiceControlAccept::STOP | ServiceControlAccept::SHUTDOWN,
            0,
        );

        supervisor.run();

        set_status(
            ServiceState::Stopped,
            ServiceControlAccept::empty(),
            supervisor.exit_code() as u32,
        );
    }

    /// Hand the process over to the service control dispatcher.
    pub fn dispatch(supervisor: Arc<Supervisor>) -> Result<i32> {
        let name = supervisor.service_name().to_string();
        *ACTIVE.lock() = Some(Arc::clone(&supervisor));

        service_dispatcher::start(&name, ffi_service_main)
            .map_err(|e| Error::Service(format!("service dispatcher failed: {e}")))?;
        Ok(supervisor.exit_code())
    }

    pub fn is_installed(supervisor: &Supervisor) -> Result<bool> {
        let manager =
            ServiceManager::local_computer(None::<&str>, ServiceManagerAccess::CONNECT)
                .map_err(|e| Error::Service(format!("cannot connect to service manager: {e}")))?;
        Ok(manager
            .open_service(supervisor.service_name(), ServiceAccess::QUERY_CONFIG)
            .is_ok())
    }

    pub fn install(supervisor: &Supervisor) -> Result<()> {
        let manager = ServiceManager::local_computer(
            None::<&str>,
            ServiceManagerAccess::CONNECT | ServiceManagerAccess::CREATE_SERVICE,
        )
        .map_err(|e| Error::Service(format!("cannot connect to service manager: {e}")))?;

        log_info!("loadOrderGroup={}", supervisor.load_order_group());
        log_info!("autoStart={}", supervisor.auto_start());

        let info = ServiceInfo {
            name: supervisor.service_name().into(),
            display_name: supervisor.service_name().into(),
            service_type: ServiceType::OWN_PROCESS,
            start_type: if supervisor.auto_start() {
                ServiceStartType::AutoStart
            } else {
                ServiceStartType::OnDemand
            },
            error_control: ServiceErrorControl::Normal,
            executable_path: supervisor.exe_file().to_path_buf(),
            launch_arguments: vec![],
            dependencies: vec![],
            account_name: None,
            account_password: None,
        };

        manager
            .create_service(&info, ServiceAccess::QUERY_STATUS)
            .map_err(|e| {
                Error::Service(format!(
                    "failed to create service {}: {e}",
                    supervisor.service_name()
                ))
            })?;

        log_info!("service {} installed", supervisor.service_name());
        Ok(())
    }

    pub fn uninstall(supervisor: &Supervisor) -> Result<()> {
        let manager =
            ServiceManager::local_computer(None::<&str>, ServiceManagerAccess::CONNECT)
                .map_err(|e| Error::Service(format!("cannot connect to service manager: {e}")))?;

        let service = manager
            .open_service(supervisor.service_name(), ServiceAccess::DELETE)
            .map_err(|e| {
                Error::Service(format!(
                    "cannot open service {}: {e}",
                    supervisor.service_name()
                ))
            })?;

        service.delete().map_err(|e| {
            Error::Service(format!(
                "service {} NOT removed: {e}",
                supervisor.service_name()
            ))
        })?;

        log_info!("service {} removed", supervisor.service_name());
        Ok(())
    }
}

pub use platform::{dispatch, install, is_installed, uninstall};
