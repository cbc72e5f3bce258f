//! Managed-runtime seam over a real JVM, through the `jni` crate.
//!
//! Attachment goes through the invocation interface directly so the
//! requested version and thread name reach the VM, and so the `jni` crate's
//! own thread-exit detach never runs alongside the bridge's.

use super::{
    AttachArgs, ByteElements, EnvStatus, GlobalRef, JValue, LocalRef, ManagedEnv, ManagedVm,
    MethodId, RawHandle, ReleaseMode,
};
use crate::error::{status_codes, VmError};
use jni::errors::{Error as JniCrateError, JniError};
use jni::objects::{JByteArray, JClass, JMethodID, JObject, JString};
use jni::signature::{Primitive, ReturnType};
use jni::{sys, JNIEnv, JavaVM};
use std::ffi::{c_void, CString};
use std::os::raw::c_char;
use std::ptr::{self, NonNull};
use std::sync::Arc;
use std::thread::ThreadId;
use tracing::warn;

fn handle_of(obj: sys::jobject) -> Option<RawHandle> {
    RawHandle::new(obj as usize as u64)
}

fn object_of(handle: RawHandle) -> sys::jobject {
    handle.get() as usize as sys::jobject
}

fn to_jvalue(value: &JValue) -> sys::jvalue {
    match *value {
        JValue::Int(i) => sys::jvalue { i },
    }
}

fn status_of(err: &JniError) -> i32 {
    match err {
        JniError::ThreadDetached => status_codes::EDETACHED,
        JniError::WrongVersion => status_codes::EVERSION,
        JniError::NoMemory => status_codes::ENOMEM,
        JniError::AlreadyCreated => status_codes::EEXIST,
        JniError::InvalidArguments => status_codes::EINVAL,
        JniError::Other(status) => *status,
        _ => status_codes::ERR,
    }
}

impl From<JniCrateError> for VmError {
    fn from(err: JniCrateError) -> Self {
        match err {
            JniCrateError::JniCall(status) => VmError::Status(status_of(&status)),
            JniCrateError::MethodNotFound { name, sig } => VmError::NoSuchMethod {
                name,
                descriptor: sig,
            },
            other => VmError::InvalidReference(other.to_string()),
        }
    }
}

/// Process-wide JVM handle
pub struct JvmVm {
    vm: JavaVM,
}

impl JvmVm {
    /// Wrap a VM obtained from the `jni` crate
    pub fn new(vm: JavaVM) -> Self {
        Self { vm }
    }

    /// Wrap a raw `JavaVM*`.
    ///
    /// # Safety
    ///
    /// `ptr` must be a valid `JavaVM*` that outlives the returned handle.
    pub unsafe fn from_raw(ptr: *mut sys::JavaVM) -> Result<Self, VmError> {
        Ok(Self::new(JavaVM::from_raw(ptr)?))
    }

    fn invoke_interface(&self) -> Result<(*mut sys::JavaVM, &sys::JNIInvokeInterface_), VmError> {
        let raw = self.vm.get_java_vm_pointer();
        if raw.is_null() {
            return Err(VmError::InvalidReference("null JavaVM".into()));
        }
        // The function table lives as long as the VM.
        let table = unsafe { &**raw };
        Ok((raw, table))
    }
}

impl ManagedVm for JvmVm {
    fn get_env(&self, version: i32) -> EnvStatus {
        let (raw, table) = match self.invoke_interface() {
            Ok(parts) => parts,
            Err(_) => return EnvStatus::Failed(status_codes::ERR),
        };
        let Some(get_env) = table.GetEnv else {
            return EnvStatus::Failed(status_codes::ERR);
        };

        let mut env: *mut c_void = ptr::null_mut();
        match unsafe { get_env(raw, &mut env, version) } {
            status_codes::OK => match unsafe { JvmEnv::from_raw(env.cast()) } {
                Some(env) => EnvStatus::Attached(Box::new(env)),
                None => EnvStatus::Failed(status_codes::ERR),
            },
            status_codes::EDETACHED => EnvStatus::Detached,
            status_codes::EVERSION => EnvStatus::UnsupportedVersion,
            status => EnvStatus::Failed(status),
        }
    }

    fn attach_current_thread(&self, args: &AttachArgs) -> Result<Box<dyn ManagedEnv>, VmError> {
        let (raw, table) = self.invoke_interface()?;
        let attach = table
            .AttachCurrentThread
            .ok_or(VmError::Status(status_codes::ERR))?;

        let name = args
            .thread_name
            .as_deref()
            .map(CString::new)
            .transpose()
            .map_err(|_| VmError::Status(status_codes::EINVAL))?;
        let mut attach_args = sys::JavaVMAttachArgs {
            version: args.version,
            name: name
                .as_ref()
                .map_or(ptr::null_mut(), |name| name.as_ptr() as *mut c_char),
            group: ptr::null_mut(),
        };

        let mut env: *mut c_void = ptr::null_mut();
        let status = unsafe {
            attach(
                raw,
                &mut env,
                (&mut attach_args as *mut sys::JavaVMAttachArgs).cast(),
            )
        };
        if status != status_codes::OK {
            return Err(VmError::Status(status));
        }

        unsafe { JvmEnv::from_raw(env.cast()) }
            .map(|env| Box::new(env) as Box<dyn ManagedEnv>)
            .ok_or(VmError::Status(status_codes::ERR))
    }

    fn detach_current_thread(&self, _thread: ThreadId) -> Result<(), VmError> {
        let (raw, table) = self.invoke_interface()?;
        let detach = table
            .DetachCurrentThread
            .ok_or(VmError::Status(status_codes::ERR))?;
        match unsafe { detach(raw) } {
            status_codes::OK => Ok(()),
            status => Err(VmError::Status(status)),
        }
    }
}

/// Environment of one JVM-attached thread
pub struct JvmEnv {
    raw: NonNull<sys::JNIEnv>,
}

impl JvmEnv {
    /// Wrap a raw `JNIEnv*`; `None` for null.
    ///
    /// # Safety
    ///
    /// `ptr` must be the calling thread's `JNIEnv*`, and the returned value
    /// must stay on this thread.
    pub unsafe fn from_raw(ptr: *mut sys::JNIEnv) -> Option<Self> {
        NonNull::new(ptr).map(|raw| Self { raw })
    }

    fn env(&self) -> Result<JNIEnv<'_>, VmError> {
        Ok(unsafe { JNIEnv::from_raw(self.raw.as_ptr()) }?)
    }

    fn native_interface(&self) -> &sys::JNINativeInterface_ {
        // The function table lives as long as the VM.
        unsafe { &**self.raw.as_ptr() }
    }

    fn local_of(obj: JObject<'_>) -> Option<LocalRef> {
        if obj.is_null() {
            None
        } else {
            handle_of(obj.into_raw()).map(LocalRef::from_raw)
        }
    }

    fn describe_pending(env: &mut JNIEnv<'_>) -> Option<String> {
        if !env.exception_check().unwrap_or(false) {
            return None;
        }
        let throwable = env.exception_occurred().ok()?;
        let _ = env.exception_clear();

        let description = env
            .call_method(&throwable, "toString", "()Ljava/lang/String;", &[])
            .and_then(|value| value.l())
            .and_then(|text| {
                let text = JString::from(text);
                let description: String = env.get_string(&text)?.into();
                env.delete_local_ref(text)?;
                Ok(description)
            })
            .unwrap_or_else(|_| {
                let _ = env.exception_clear();
                "java.lang.Throwable".to_string()
            });
        let _ = env.delete_local_ref(throwable);
        Some(description)
    }
}

impl ManagedEnv for JvmEnv {
    fn vm(&self) -> Result<Arc<dyn ManagedVm>, VmError> {
        let vm = self.env()?.get_java_vm()?;
        Ok(Arc::new(JvmVm::new(vm)))
    }

    fn new_global_ref(&self, obj: &LocalRef) -> Result<GlobalRef, VmError> {
        let new_global_ref = self
            .native_interface()
            .NewGlobalRef
            .ok_or(VmError::Status(status_codes::ERR))?;
        let global = unsafe { new_global_ref(self.raw.as_ptr(), object_of(obj.handle())) };
        handle_of(global)
            .map(GlobalRef::from_raw)
            .ok_or(VmError::Status(status_codes::ENOMEM))
    }

    fn delete_local_ref(&self, obj: LocalRef) {
        let deleted = self.env().and_then(|env| {
            let obj = unsafe { JObject::from_raw(object_of(obj.handle())) };
            Ok(env.delete_local_ref(obj)?)
        });
        if let Err(e) = deleted {
            warn!(error = %e, "Failed to delete local reference");
        }
    }

    fn delete_global_ref(&self, obj: &GlobalRef) {
        match self.native_interface().DeleteGlobalRef {
            Some(delete) => unsafe { delete(self.raw.as_ptr(), object_of(obj.handle())) },
            None => warn!("DeleteGlobalRef missing from the native interface"),
        }
    }

    fn get_object_class(&self, obj: &GlobalRef) -> Result<LocalRef, VmError> {
        let mut env = self.env()?;
        let obj = unsafe { JObject::from_raw(object_of(obj.handle())) };
        let class = env.get_object_class(&obj)?;
        handle_of(class.as_raw())
            .map(LocalRef::from_raw)
            .ok_or_else(|| VmError::InvalidReference("null class".into()))
    }

    fn get_method_id(
        &self,
        class: &LocalRef,
        name: &str,
        descriptor: &str,
    ) -> Result<MethodId, VmError> {
        let mut env = self.env()?;
        let class = unsafe { JClass::from_raw(object_of(class.handle())) };
        let method = env.get_method_id(&class, name, descriptor).map_err(|e| match e {
            JniCrateError::JavaException | JniCrateError::NullPtr(_) => VmError::NoSuchMethod {
                name: name.to_string(),
                descriptor: descriptor.to_string(),
            },
            other => other.into(),
        })?;
        RawHandle::new(method.into_raw() as usize as u64)
            .map(MethodId::from_raw)
            .ok_or_else(|| VmError::InvalidReference("null method id".into()))
    }

    fn call_int_method(&self, obj: &GlobalRef, method: MethodId, args: &[JValue]) -> i32 {
        let Ok(mut env) = self.env() else {
            return 0;
        };
        let obj = unsafe { JObject::from_raw(object_of(obj.handle())) };
        let method = unsafe { JMethodID::from_raw(method.handle().get() as usize as sys::jmethodID) };
        let args: Vec<sys::jvalue> = args.iter().map(to_jvalue).collect();
        unsafe {
            env.call_method_unchecked(&obj, method, ReturnType::Primitive(Primitive::Int), &args)
        }
        .and_then(|value| value.i())
        .unwrap_or(0)
    }

    fn call_void_method(&self, obj: &GlobalRef, method: MethodId, args: &[JValue]) {
        let Ok(mut env) = self.env() else {
            return;
        };
        let obj = unsafe { JObject::from_raw(object_of(obj.handle())) };
        let method = unsafe { JMethodID::from_raw(method.handle().get() as usize as sys::jmethodID) };
        let args: Vec<sys::jvalue> = args.iter().map(to_jvalue).collect();
        // A thrown exception stays pending for the caller to check.
        let _ = unsafe {
            env.call_method_unchecked(&obj, method, ReturnType::Primitive(Primitive::Void), &args)
        };
    }

    fn call_object_method(
        &self,
        obj: &GlobalRef,
        method: MethodId,
        args: &[JValue],
    ) -> Option<LocalRef> {
        let mut env = self.env().ok()?;
        let obj = unsafe { JObject::from_raw(object_of(obj.handle())) };
        let method = unsafe { JMethodID::from_raw(method.handle().get() as usize as sys::jmethodID) };
        let args: Vec<sys::jvalue> = args.iter().map(to_jvalue).collect();
        let result = unsafe { env.call_method_unchecked(&obj, method, ReturnType::Array, &args) };
        result
            .and_then(|value| value.l())
            .ok()
            .and_then(Self::local_of)
    }

    fn get_array_length(&self, array: &LocalRef) -> Result<usize, VmError> {
        let env = self.env()?;
        let array = unsafe { JByteArray::from_raw(object_of(array.handle())) };
        let len = env.get_array_length(&array)?;
        usize::try_from(len).map_err(|_| VmError::NotAnArray(format!("length {}", len)))
    }

    fn get_byte_array_elements(&self, array: &LocalRef) -> Result<ByteElements, VmError> {
        let len = self.get_array_length(array)?;
        let get_elements = self
            .native_interface()
            .GetByteArrayElements
            .ok_or(VmError::Status(status_codes::ERR))?;

        let mut is_copy: sys::jboolean = sys::JNI_FALSE;
        let elements =
            unsafe { get_elements(self.raw.as_ptr(), object_of(array.handle()), &mut is_copy) };
        let ptr = NonNull::new(elements.cast::<u8>()).ok_or(VmError::Status(status_codes::ENOMEM))?;

        // Pinned or copied by the VM until ReleaseByteArrayElements.
        Ok(unsafe { ByteElements::from_raw_parts(ptr, len, is_copy == sys::JNI_TRUE) })
    }

    fn release_byte_array_elements(
        &self,
        array: &LocalRef,
        elements: ByteElements,
        mode: ReleaseMode,
    ) {
        let Some(ptr) = elements.as_raw_ptr() else {
            warn!("Released a byte view the VM did not hand out");
            return;
        };
        match self.native_interface().ReleaseByteArrayElements {
            Some(release) => unsafe {
                release(
                    self.raw.as_ptr(),
                    object_of(array.handle()),
                    ptr.as_ptr().cast::<sys::jbyte>(),
                    mode as sys::jint,
                )
            },
            None => warn!("ReleaseByteArrayElements missing from the native interface"),
        }
    }

    fn exception_check(&self) -> bool {
        self.env()
            .map(|env| env.exception_check().unwrap_or(false))
            .unwrap_or(false)
    }

    fn take_exception(&self) -> Option<String> {
        let mut env = self.env().ok()?;
        Self::describe_pending(&mut env)
    }
}
