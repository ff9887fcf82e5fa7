use super::ffi::*;
use crate::error::{Result, SnapError};
use crate::events::{Pid, Point, Size, SubscriptionId, WindowHandle, WindowSet};
use crate::services::backend::r#trait::{Accessibility, Attribute, AttributeValue, AxNotification, EventSink};
use crate::{snap_error, trace_if_enabled};
use core_foundation::array::{CFArrayGetCount, CFArrayGetTypeID, CFArrayGetValueAtIndex, CFArrayRef};
use core_foundation::base::{CFEqual, CFType, CFTypeRef, TCFType};
use core_foundation::runloop::{kCFRunLoopDefaultMode, CFRunLoop, CFRunLoopRunResult, CFRunLoopSource};
use core_foundation::string::CFString;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::c_void;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// AXUIElement с подсчётом ссылок CoreFoundation
#[derive(Clone)]
struct AxElement(CFType);

// SAFETY: AXUIElement: неизменяемая ссылка на удалённый объект,
// Accessibility API допускает обращения с любого потока
unsafe impl Send for AxElement {}
unsafe impl Sync for AxElement {}

impl AxElement {
    fn application(pid: Pid) -> Option<Self> {
        let element = unsafe { AXUIElementCreateApplication(pid) };
        if element.is_null() {
            return None;
        }
        Some(Self(unsafe { CFType::wrap_under_create_rule(element) }))
    }

    fn from_array_item(item: CFTypeRef) -> Option<Self> {
        if item.is_null() {
            return None;
        }
        let value = unsafe { CFType::wrap_under_get_rule(item) };
        (value.type_of() == unsafe { AXUIElementGetTypeID() }).then_some(Self(value))
    }

    fn as_raw(&self) -> AXUIElementRef {
        self.0.as_CFTypeRef()
    }

    fn same_as(&self, other: &AxElement) -> bool {
        unsafe { CFEqual(self.as_raw(), other.as_raw()) != 0 }
    }

    fn copy(&self, attribute: Attribute) -> std::result::Result<CFType, AXError> {
        let name = CFString::from_static_string(attribute.name());
        let mut value: CFTypeRef = ptr::null();
        let err = unsafe { AXUIElementCopyAttributeValue(self.as_raw(), name.as_concrete_TypeRef(), &mut value) };
        if err != kAXErrorSuccess {
            return Err(err);
        }
        if value.is_null() {
            return Err(kAXErrorCannotComplete);
        }
        Ok(unsafe { CFType::wrap_under_create_rule(value) })
    }

    fn set(&self, attribute: Attribute, value: &CFType) -> AXError {
        let name = CFString::from_static_string(attribute.name());
        unsafe { AXUIElementSetAttributeValue(self.as_raw(), name.as_concrete_TypeRef(), value.as_CFTypeRef()) }
    }
}

fn string_value(value: &CFType) -> Option<String> {
    value.downcast::<CFString>().map(|s| s.to_string())
}

fn is_ax_value(value: &CFType) -> bool {
    value.type_of() == unsafe { AXValueGetTypeID() }
}

fn point_value(value: &CFType) -> Option<Point> {
    if !is_ax_value(value) {
        return None;
    }
    let mut point = CGPoint::default();
    let ok = unsafe {
        AXValueGetValue(
            value.as_CFTypeRef(),
            kAXValueCGPointType,
            (&mut point as *mut CGPoint).cast::<c_void>(),
        )
    };
    ok.then(|| Point::new(point.x, point.y))
}

fn size_value(value: &CFType) -> Option<Size> {
    if !is_ax_value(value) {
        return None;
    }
    let mut size = CGSize::default();
    let ok = unsafe {
        AXValueGetValue(
            value.as_CFTypeRef(),
            kAXValueCGSizeType,
            (&mut size as *mut CGSize).cast::<c_void>(),
        )
    };
    ok.then(|| Size::new(size.width, size.height))
}

fn create_ax_value<T>(value_type: u32, value: &T) -> Option<CFType> {
    let raw = unsafe { AXValueCreate(value_type, (value as *const T).cast::<c_void>()) };
    if raw.is_null() {
        return None;
    }
    Some(unsafe { CFType::wrap_under_create_rule(raw) })
}

fn element_array(value: &CFType) -> Option<Vec<AxElement>> {
    if value.type_of() != unsafe { CFArrayGetTypeID() } {
        return None;
    }
    let array = value.as_CFTypeRef() as CFArrayRef;
    let count = unsafe { CFArrayGetCount(array) };
    Some(
        (0..count)
            .filter_map(|index| AxElement::from_array_item(unsafe { CFArrayGetValueAtIndex(array, index) }))
            .collect(),
    )
}

struct RegisteredWindow {
    pid: Pid,
    element: AxElement,
}

/// Соответствие `WindowHandle` ↔ AXUIElement. Равенство элементов: CFEqual.
#[derive(Default)]
struct ElementRegistry {
    windows: HashMap<WindowHandle, RegisteredWindow>,
    next_handle: u64,
}

impl ElementRegistry {
    fn handle_for(&mut self, pid: Pid, element: AxElement) -> WindowHandle {
        let existing = self
            .windows
            .iter()
            .find(|(_, window)| window.pid == pid && window.element.same_as(&element))
            .map(|(&handle, _)| handle);
        if let Some(handle) = existing {
            return handle;
        }

        self.next_handle += 1;
        let handle = WindowHandle::new(self.next_handle);
        self.windows.insert(handle, RegisteredWindow { pid, element });
        handle
    }

    /// Закрытые окна процесса перестают резолвиться
    fn retain_pid(&mut self, pid: Pid, alive: &[WindowHandle]) {
        self.windows
            .retain(|handle, window| window.pid != pid || alive.contains(handle));
    }

    fn forget_pid(&mut self, pid: Pid) {
        self.windows.retain(|_, window| window.pid != pid);
    }

    fn element(&self, window: WindowHandle) -> Option<AxElement> {
        self.windows.get(&window).map(|window| window.element.clone())
    }
}

/// Слот колбэка подписки. ОС может вызвать колбэк уже во время отписки,
/// поэтому слот освобождается не раньше следующего прохода run loop.
type SinkSlot = Mutex<Option<EventSink>>;

struct SlotEntry {
    slot: Box<SinkSlot>,
    /// Номер прохода run loop, на котором подписку сняли
    retired_at: Option<u64>,
}

/// Слоты живых и снятых подписок
#[derive(Default)]
struct SlotPool {
    entries: Vec<SlotEntry>,
}

impl SlotPool {
    fn insert(&mut self, sink: EventSink) -> *const SinkSlot {
        let slot: Box<SinkSlot> = Box::new(Mutex::new(Some(sink)));
        let ptr: *const SinkSlot = &*slot;
        self.entries.push(SlotEntry { slot, retired_at: None });
        ptr
    }

    /// Очищает слот; память остаётся, пока run loop не сделает ещё проход
    fn retire(&mut self, ptr: *const SinkSlot, pass: u64) {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|entry| ptr::eq(&*entry.slot, ptr))
        {
            *entry.slot.lock() = None;
            entry.retired_at = Some(pass);
        }
    }

    /// Освобождает слоты, снятые до завершившегося прохода `pass`
    fn reclaim(&mut self, pass: u64) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|entry| !matches!(entry.retired_at, Some(retired) if retired < pass));
        before - self.entries.len()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

unsafe extern "C" fn observer_callback(
    _observer: AXObserverRef,
    _element: AXUIElementRef,
    _notification: core_foundation::string::CFStringRef,
    refcon: *mut c_void,
) {
    if refcon.is_null() {
        return;
    }
    // SAFETY: refcon указывает на SinkSlot, который живёт дольше потока run loop
    let slot = unsafe { &*(refcon as *const SinkSlot) };
    let sink = slot.lock().clone();
    if let Some(sink) = sink {
        sink();
    }
}

struct Observation {
    pid: Pid,
    observer: CFType,
    application: AxElement,
    notification: CFString,
    source: CFRunLoopSource,
    slot: *const SinkSlot,
}

// SAFETY: все CF-объекты используются только для добавления/удаления
// источника, что потокобезопасно; slot живёт в MacAccessibility::slots
// до следующего прохода run loop после отписки
unsafe impl Send for Observation {}

struct SendRunLoop(CFRunLoop);

// SAFETY: CFRunLoopAddSource/RemoveSource/Stop потокобезопасны
unsafe impl Send for SendRunLoop {}
unsafe impl Sync for SendRunLoop {}

/// Поток с собственным CFRunLoop, на котором срабатывают AXObserver
struct ObserverThread {
    run_loop: SendRunLoop,
    stop: Arc<AtomicBool>,
    /// Число завершённых проходов run loop
    passes: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl ObserverThread {
    fn spawn() -> Result<Self> {
        let (tx, rx) = std::sync::mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let passes = Arc::new(AtomicU64::new(0));
        let counter = passes.clone();

        let handle = std::thread::Builder::new()
            .name("ax-observer".to_string())
            .spawn(move || {
                let _ = tx.send(SendRunLoop(CFRunLoop::get_current()));
                while !flag.load(Ordering::Acquire) {
                    let result = CFRunLoop::run_in_mode(
                        unsafe { kCFRunLoopDefaultMode },
                        Duration::from_millis(500),
                        false,
                    );
                    counter.fetch_add(1, Ordering::AcqRel);
                    // Без источников run loop возвращается сразу
                    if matches!(result, CFRunLoopRunResult::Finished) {
                        std::thread::sleep(Duration::from_millis(100));
                    }
                }
            })?;

        let run_loop = rx
            .recv_timeout(Duration::from_secs(2))
            .map_err(|e| snap_error!(internal, "Поток наблюдателя не запустился: {}", e))?;

        Ok(Self {
            run_loop,
            stop,
            passes,
            handle: Some(handle),
        })
    }

    fn passes(&self) -> u64 {
        self.passes.load(Ordering::Acquire)
    }
}

impl Drop for ObserverThread {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.run_loop.0.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Реализация `Accessibility` поверх AXUIElement/AXObserver
pub struct MacAccessibility {
    registry: Mutex<ElementRegistry>,
    observations: Mutex<HashMap<SubscriptionId, Observation>>,
    next_subscription: AtomicU64,
    thread: ObserverThread,
    slots: Mutex<SlotPool>,
}

impl MacAccessibility {
    pub fn new() -> Result<Self> {
        let thread = ObserverThread::spawn()?;
        info!("Поток AXObserver запущен");
        Ok(Self {
            registry: Mutex::new(ElementRegistry::default()),
            observations: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
            thread,
            slots: Mutex::new(SlotPool::default()),
        })
    }

    fn element(&self, window: WindowHandle) -> Option<AxElement> {
        self.registry.lock().element(window)
    }

    fn remove_observation(&self, observation: Observation) {
        unsafe {
            self.thread.run_loop.0.remove_source(&observation.source, kCFRunLoopDefaultMode);
            AXObserverRemoveNotification(
                observation.observer.as_CFTypeRef(),
                observation.application.as_raw(),
                observation.notification.as_concrete_TypeRef(),
            );
        }
        self.slots.lock().retire(observation.slot, self.thread.passes());
        self.registry.lock().forget_pid(observation.pid);
    }
}

impl Accessibility for MacAccessibility {
    fn is_trusted(&self) -> bool {
        unsafe { AXIsProcessTrusted() }
    }

    fn windows(&self, pid: Pid) -> Result<WindowSet> {
        let application = AxElement::application(pid)
            .ok_or_else(|| snap_error!(accessibility, "Нет AXUIElement для pid {}", pid))?;
        let value = application
            .copy(Attribute::Windows)
            .map_err(|err| snap_error!(accessibility, "{} для pid {}: AXError {}", Attribute::Windows, pid, err))?;
        let elements = match element_array(&value) {
            Some(elements) => elements,
            None => return SnapError::accessibility(format!("{} pid {} не массив", Attribute::Windows, pid)),
        };

        let mut registry = self.registry.lock();
        let windows: WindowSet = elements
            .into_iter()
            .map(|element| registry.handle_for(pid, element))
            .collect();
        registry.retain_pid(pid, &windows);
        Ok(windows)
    }

    fn attribute(&self, window: WindowHandle, attribute: Attribute) -> Option<AttributeValue> {
        let element = self.element(window)?;
        let value = match element.copy(attribute) {
            Ok(value) => value,
            Err(err) => {
                trace_if_enabled!("{}: {} недоступен (AXError {})", window, attribute, err);
                return None;
            }
        };

        match attribute {
            Attribute::Role => string_value(&value).map(AttributeValue::Role),
            Attribute::Subrole => string_value(&value).map(AttributeValue::Subrole),
            Attribute::Title => string_value(&value).map(AttributeValue::Title),
            Attribute::Size => size_value(&value).map(AttributeValue::Size),
            Attribute::Position => point_value(&value).map(AttributeValue::Position),
            // Окна перечисляются у приложения, а не у окна
            Attribute::Windows => None,
        }
    }

    fn set_attribute(&self, window: WindowHandle, value: AttributeValue) -> Result<()> {
        let element = self
            .element(window)
            .ok_or_else(|| snap_error!(accessibility, "{} больше не существует", window))?;

        let encoded = match &value {
            AttributeValue::Size(size) => create_ax_value(
                kAXValueCGSizeType,
                &CGSize {
                    width: size.width,
                    height: size.height,
                },
            ),
            AttributeValue::Position(point) => create_ax_value(kAXValueCGPointType, &CGPoint { x: point.x, y: point.y }),
            other => return SnapError::accessibility(format!("{} только для чтения", other.attribute())),
        };
        let encoded = encoded.ok_or_else(|| snap_error!(accessibility, "AXValueCreate для {} не удался", value.attribute()))?;

        match element.set(value.attribute(), &encoded) {
            kAXErrorSuccess => Ok(()),
            kAXErrorInvalidUIElement => SnapError::accessibility(format!("{} закрыто", window)),
            err => SnapError::accessibility(format!("{} {}: AXError {}", window, value.attribute(), err)),
        }
    }

    fn subscribe(&self, pid: Pid, notification: AxNotification, sink: EventSink) -> Result<SubscriptionId> {
        let application = AxElement::application(pid)
            .ok_or_else(|| snap_error!(subscription, "Нет AXUIElement для pid {}", pid))?;

        let mut observer_ref: AXObserverRef = ptr::null();
        let err = unsafe { AXObserverCreate(pid, observer_callback, &mut observer_ref) };
        if err != kAXErrorSuccess || observer_ref.is_null() {
            return Err(snap_error!(subscription, "AXObserverCreate pid {}: AXError {}", pid, err));
        }
        let observer = unsafe { CFType::wrap_under_create_rule(observer_ref) };

        let slot_ptr = {
            let mut slots = self.slots.lock();
            let freed = slots.reclaim(self.thread.passes());
            if freed > 0 {
                debug!("Освобождено {} слотов снятых подписок", freed);
            }
            slots.insert(sink)
        };

        let name = CFString::from_static_string(notification.name());
        let err = unsafe {
            AXObserverAddNotification(
                observer_ref,
                application.as_raw(),
                name.as_concrete_TypeRef(),
                slot_ptr as *mut c_void,
            )
        };
        if err != kAXErrorSuccess {
            self.slots.lock().retire(slot_ptr, self.thread.passes());
            return Err(snap_error!(subscription, "{} pid {}: AXError {}", notification.name(), pid, err));
        }

        let source = unsafe { CFRunLoopSource::wrap_under_get_rule(AXObserverGetRunLoopSource(observer_ref)) };
        self.thread.run_loop.0.add_source(&source, unsafe { kCFRunLoopDefaultMode });

        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.observations.lock().insert(
            id,
            Observation {
                pid,
                observer,
                application,
                notification: name,
                source,
                slot: slot_ptr,
            },
        );
        debug!("Подписка {:?} на {} pid {}", id, notification.name(), pid);
        Ok(id)
    }

    fn unsubscribe(&self, subscription: SubscriptionId) {
        let observation = self.observations.lock().remove(&subscription);
        match observation {
            Some(observation) => {
                debug!("Отписка {:?} от pid {}", subscription, observation.pid);
                self.remove_observation(observation);
            }
            None => debug!("Подписка {:?} уже снята", subscription),
        }
    }
}

impl Drop for MacAccessibility {
    fn drop(&mut self) {
        let observations: Vec<Observation> = self.observations.lock().drain().map(|(_, o)| o).collect();
        if !observations.is_empty() {
            warn!("Снимаем {} незакрытых подписок", observations.len());
        }
        for observation in observations {
            self.remove_observation(observation);
        }
        // Поток останавливается при drop поля thread, слоты освобождаются после
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink() -> EventSink {
        Arc::new(|| {})
    }

    #[test]
    fn test_retired_slot_is_freed_after_next_pass() {
        let mut pool = SlotPool::default();
        let live = pool.insert(sink());
        let retired = pool.insert(sink());

        pool.retire(retired, 7);
        assert!(unsafe { (*retired).lock().is_none() });
        assert!(unsafe { (*live).lock().is_some() });

        // Проход, во время которого сняли подписку, ещё мог вызвать колбэк
        assert_eq!(pool.reclaim(7), 0);
        assert_eq!(pool.len(), 2);

        assert_eq!(pool.reclaim(8), 1);
        assert_eq!(pool.len(), 1);
        assert!(unsafe { (*live).lock().is_some() });
    }

    #[test]
    fn test_relaunches_do_not_accumulate_slots() {
        let mut pool = SlotPool::default();
        for pass in 0..50 {
            pool.reclaim(pass);
            let slot = pool.insert(sink());
            pool.retire(slot, pass);
        }
        assert!(pool.len() <= 1);
    }
}
